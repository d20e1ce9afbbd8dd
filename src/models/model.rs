//! Model definitions and traits
//!
//! This module defines the inference capability the gateway drives
//! ([`EmbeddingModel`]) and the factory the registry uses to build one per
//! model name ([`ModelLoader`]).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Embedding, EmbeddingResult};

/// Information about a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, as requested by clients
    pub name: String,
    /// Embedding dimension, when the backend knows it up front
    pub dimension: Option<usize>,
    /// Maximum sequence length in tokens
    pub max_sequence_length: usize,
    /// Backend that produced the model ("onnx", "mock", ...)
    pub backend: String,
}

/// Core embedding model trait.
///
/// `embed` is synchronous and CPU-bound; callers run it on the offload pool,
/// never on a request task. Implementations must tolerate concurrent calls
/// from several pool workers.
pub trait EmbeddingModel: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Generate one embedding per input text, in input order.
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>>;

    /// Get the embedding dimension, if known
    fn dimension(&self) -> Option<usize> {
        self.info().dimension
    }
}

/// Shared, immutable handle to a constructed model
pub type ModelHandle = Arc<dyn EmbeddingModel>;

/// Builds model handles by name. Construction may block for seconds.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_name: &str) -> EmbeddingResult<ModelHandle>;
}

/// ONNX-based embedding model implementation
#[cfg(feature = "onnx")]
pub mod onnx {
    use super::*;
    use std::sync::Mutex;
    use tracing::info;

    use crate::models::config::EmbeddingModelsConfig;
    use crate::models::EmbeddingError;
    use crate::onnx::{OnnxConfig, OnnxEmbeddingEngine};

    /// ONNX embedding model
    pub struct OnnxEmbeddingModel {
        info: ModelInfo,
        // ort sessions need exclusive access per run
        engine: Mutex<OnnxEmbeddingEngine>,
    }

    impl EmbeddingModel for OnnxEmbeddingModel {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| EmbeddingError::inference(&self.info.name, "engine lock poisoned"))?;
            engine
                .embed_texts(texts)
                .map_err(|e| EmbeddingError::inference(&self.info.name, e))
        }
    }

    /// Loads models from `<models_dir>/<name>/` unless overridden per model
    pub struct OnnxModelLoader {
        config: EmbeddingModelsConfig,
    }

    impl OnnxModelLoader {
        pub fn new(config: EmbeddingModelsConfig) -> Self {
            Self { config }
        }
    }

    impl ModelLoader for OnnxModelLoader {
        fn load(&self, model_name: &str) -> EmbeddingResult<ModelHandle> {
            let resolved = self.config.resolve(model_name)?;
            info!(
                "Loading ONNX model {} from {}",
                model_name,
                resolved.model_path.display()
            );

            let onnx_config = OnnxConfig {
                library_path: self.config.runtime_library_path.clone(),
                thread_pool_size: resolved.num_threads,
                max_sequence_length: resolved.max_sequence_length,
            };
            let engine =
                OnnxEmbeddingEngine::new(&resolved.model_path, &resolved.tokenizer_path, &onnx_config)
                    .map_err(|e| EmbeddingError::load(model_name, e))?;

            let model = OnnxEmbeddingModel {
                info: ModelInfo {
                    name: model_name.to_string(),
                    dimension: None,
                    max_sequence_length: resolved.max_sequence_length,
                    backend: "onnx".to_string(),
                },
                engine: Mutex::new(engine),
            };
            Ok(Arc::new(model))
        }
    }
}
