//! Configuration module for embedding models
//!
//! Models are found by name under `models_dir`; a model directory holds
//! `model.onnx` and `tokenizer.json`. Individual models can override the
//! file locations and runtime settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::models::EmbeddingError;

/// Model-level configuration (the `[models]` table of the server config)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingModelsConfig {
    /// Root directory holding one sub-directory per model
    pub models_dir: String,
    /// Default maximum sequence length in tokens
    pub max_sequence_length: usize,
    /// Default intra-op threads per ONNX session
    pub num_threads: usize,
    /// Path to the ONNX Runtime shared library (ORT_DYLIB_PATH)
    pub runtime_library_path: Option<String>,
    /// Per-model overrides, keyed by model name
    pub overrides: HashMap<String, ModelOverride>,
}

impl Default for EmbeddingModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            max_sequence_length: 256,
            num_threads: 1,
            runtime_library_path: None,
            overrides: HashMap::new(),
        }
    }
}

/// Configuration overrides for a specific model
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelOverride {
    pub model_path: Option<String>,
    pub tokenizer_path: Option<String>,
    pub max_sequence_length: Option<usize>,
    pub num_threads: Option<usize>,
}

/// Fully resolved location and settings of one model
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub max_sequence_length: usize,
    pub num_threads: usize,
}

impl EmbeddingModelsConfig {
    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self, EmbeddingError> {
        let config: EmbeddingModelsConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the files and settings for `model_name`.
    ///
    /// Names come straight from clients, so anything that could escape
    /// `models_dir` is rejected.
    pub fn resolve(&self, model_name: &str) -> Result<ResolvedModel, EmbeddingError> {
        let overrides = self.overrides.get(model_name).cloned().unwrap_or_default();

        let model_dir = if overrides.model_path.is_none() || overrides.tokenizer_path.is_none() {
            Some(self.model_dir(model_name)?)
        } else {
            None
        };
        let in_model_dir = |file: &str| model_dir.as_ref().map(|dir| dir.join(file));

        let model_path = overrides
            .model_path
            .map(PathBuf::from)
            .or_else(|| in_model_dir("model.onnx"));
        let tokenizer_path = overrides
            .tokenizer_path
            .map(PathBuf::from)
            .or_else(|| in_model_dir("tokenizer.json"));

        match (model_path, tokenizer_path) {
            (Some(model_path), Some(tokenizer_path)) => Ok(ResolvedModel {
                model_path,
                tokenizer_path,
                max_sequence_length: overrides
                    .max_sequence_length
                    .unwrap_or(self.max_sequence_length),
                num_threads: overrides.num_threads.unwrap_or(self.num_threads).max(1),
            }),
            _ => Err(EmbeddingError::load(model_name, "no model files configured")),
        }
    }

    fn model_dir(&self, model_name: &str) -> Result<PathBuf, EmbeddingError> {
        let relative = Path::new(model_name);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if model_name.is_empty() || !safe {
            return Err(EmbeddingError::load(model_name, "invalid model name"));
        }
        Ok(Path::new(&self.models_dir).join(relative))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.max_sequence_length == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "max_sequence_length must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_models_dir() {
        let config = EmbeddingModelsConfig::default();
        let resolved = config.resolve("all-MiniLM-L6-v2").unwrap();

        assert_eq!(resolved.model_path, PathBuf::from("models/all-MiniLM-L6-v2/model.onnx"));
        assert_eq!(
            resolved.tokenizer_path,
            PathBuf::from("models/all-MiniLM-L6-v2/tokenizer.json")
        );
        assert_eq!(resolved.max_sequence_length, 256);
    }

    #[test]
    fn test_resolve_with_overrides() {
        let config_str = r#"
            models_dir = "/srv/models"
            num_threads = 2

            [overrides.bge-small]
            model_path = "/opt/bge/model_quantized.onnx"
            max_sequence_length = 512
        "#;

        let config = EmbeddingModelsConfig::from_str(config_str).unwrap();
        let resolved = config.resolve("bge-small").unwrap();

        assert_eq!(resolved.model_path, PathBuf::from("/opt/bge/model_quantized.onnx"));
        assert_eq!(resolved.tokenizer_path, PathBuf::from("/srv/models/bge-small/tokenizer.json"));
        assert_eq!(resolved.max_sequence_length, 512);
        assert_eq!(resolved.num_threads, 2);
    }

    #[test]
    fn test_resolve_rejects_path_escapes() {
        let config = EmbeddingModelsConfig::default();

        for name in ["../etc", "/abs/model", "a/../../b", ""] {
            let err = config.resolve(name).unwrap_err();
            assert!(matches!(err, EmbeddingError::ModelLoadError { .. }), "{name}");
        }
    }

    #[test]
    fn test_invalid_sequence_length() {
        let config = EmbeddingModelsConfig::from_str("max_sequence_length = 0").unwrap();
        assert!(config.validate().is_err());
    }
}
