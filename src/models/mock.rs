//! Deterministic in-process models for tests and local development.
//!
//! Vectors depend only on the input text and the model dimension, so the
//! same text always embeds to the same vector regardless of batch position.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::model::{EmbeddingModel, ModelHandle, ModelInfo, ModelLoader};
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};

/// Any text containing this marker makes the whole mock batch fail
pub const FAIL_MARKER: &str = "__fail__";

/// Mock embedding model
#[derive(Debug)]
pub struct MockEmbeddingModel {
    info: ModelInfo,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockEmbeddingModel {
    pub fn new(name: &str, dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                name: name.to_string(),
                dimension: Some(dimension),
                max_sequence_length: 512,
                backend: "mock".to_string(),
            },
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `embed` call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `embed` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector this model produces for `text`
    pub fn vector_for(text: &str, dimension: usize) -> Embedding {
        let seed = text
            .bytes()
            .enumerate()
            .fold(17u64, |acc, (i, b)| {
                acc.wrapping_mul(31).wrapping_add(b as u64 * (i as u64 + 1))
            });
        (0..dimension)
            .map(|d| {
                let mixed = seed.wrapping_mul(d as u64 * 2 + 1).rotate_left(d as u32 % 64);
                (mixed % 10_000) as f32 / 10_000.0
            })
            .collect()
    }
}

impl EmbeddingModel for MockEmbeddingModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(bad) = texts.iter().position(|t| t.contains(FAIL_MARKER)) {
            return Err(EmbeddingError::inference(
                &self.info.name,
                format!("cannot embed input {}", bad),
            ));
        }
        let dimension = self.info.dimension.unwrap_or(8);
        Ok(texts
            .iter()
            .map(|text| Self::vector_for(text, dimension))
            .collect())
    }
}

/// Mock loader that counts constructions and records every requested name
#[derive(Debug, Default)]
pub struct MockModelLoader {
    dimension: usize,
    load_delay: Duration,
    inference_delays: HashMap<String, Duration>,
    failing: Mutex<HashSet<String>>,
    constructions: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockModelLoader {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Block this long inside every construction
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Models named `model_name` sleep `delay` per inference call
    pub fn with_inference_delay(mut self, model_name: &str, delay: Duration) -> Self {
        self.inference_delays.insert(model_name.to_string(), delay);
        self
    }

    /// Construction of `model_name` fails until [`MockModelLoader::heal`] is called
    pub fn failing(self, model_name: &str) -> Self {
        self.set_failing(model_name, true);
        self
    }

    pub fn heal(&self, model_name: &str) {
        self.set_failing(model_name, false);
    }

    fn set_failing(&self, model_name: &str, failing: bool) {
        let mut names = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            names.insert(model_name.to_string());
        } else {
            names.remove(model_name);
        }
    }

    /// Number of constructions attempted, failed ones included
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Names passed to `load`, in call order
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self, model_name: &str) -> EmbeddingResult<ModelHandle> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(model_name.to_string());

        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(model_name);
        if failing {
            return Err(EmbeddingError::load(model_name, "model artifact not found"));
        }

        let delay = self
            .inference_delays
            .get(model_name)
            .copied()
            .unwrap_or_default();
        let model = MockEmbeddingModel::new(model_name, self.dimension.max(1)).with_delay(delay);
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_are_deterministic_and_distinct() {
        let a = MockEmbeddingModel::vector_for("alpha", 8);
        let b = MockEmbeddingModel::vector_for("beta", 8);
        assert_eq!(a, MockEmbeddingModel::vector_for("alpha", 8));
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_fail_marker_fails_whole_batch() {
        let model = MockEmbeddingModel::new("m", 4);
        let texts = vec!["ok".to_string(), format!("x{}", FAIL_MARKER)];
        let err = model.embed(&texts).unwrap_err();
        assert!(matches!(err, EmbeddingError::InferenceError { .. }));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_loader_failure_can_heal() {
        let loader = MockModelLoader::new(4).failing("flaky");
        assert!(loader.load("flaky").is_err());
        loader.heal("flaky");
        assert!(loader.load("flaky").is_ok());
        assert_eq!(loader.constructions(), 2);
        assert_eq!(loader.requested(), vec!["flaky".to_string(), "flaky".to_string()]);
    }
}
