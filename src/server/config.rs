//! Embedding Gateway Configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::coordinator::CoordinatorLimits;
use crate::models::{EmbeddingError, EmbeddingModelsConfig, DEFAULT_MODEL_NAME};
use crate::pool::DEFAULT_MAX_WORKERS;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "EMBEDDING_GATEWAY_CONFIG";

/// Config file used when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Where [`ServerConfig::load`] found its settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The file was missing; built-in defaults are in use
    Defaults(PathBuf),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub performance: PerformanceConfig,
    pub embedding: EmbeddingConfig,
    pub models: EmbeddingModelsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// gRPC listen address (plaintext)
    pub grpc_bind_address: String,
    /// JSON gateway listen address; disabled when unset
    pub http_bind_address: Option<String>,
    pub tcp_nodelay: bool,
    pub http2_keepalive_interval_secs: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            grpc_bind_address: "[::]:50051".to_string(),
            http_bind_address: None,
            tcp_nodelay: true,
            http2_keepalive_interval_secs: Some(75),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Inference calls allowed to run at the same time
    pub max_workers: usize,
    /// Bound on inference calls waiting for a worker; unbounded when unset
    pub max_queued_tasks: Option<usize>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_queued_tasks: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub default_model: String,
    pub max_batch_size: usize,
    /// Maximum text length in bytes
    pub max_text_length: usize,
    /// Model names clients may request; empty allows any
    pub allowed_models: Vec<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let limits = CoordinatorLimits::default();
        Self {
            default_model: DEFAULT_MODEL_NAME.to_string(),
            max_batch_size: limits.max_batch_size,
            max_text_length: limits.max_text_length,
            allowed_models: Vec::new(),
        }
    }
}

impl EmbeddingConfig {
    pub fn limits(&self) -> CoordinatorLimits {
        CoordinatorLimits {
            default_model: self.default_model.clone(),
            max_batch_size: self.max_batch_size,
            max_text_length: self.max_text_length,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EmbeddingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, EmbeddingError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `EMBEDDING_GATEWAY_CONFIG` or `config.toml`, falling back to
    /// defaults when the file does not exist. Runs before logging is set up,
    /// so the caller reports the returned source.
    pub fn load() -> Result<(Self, ConfigSource), EmbeddingError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from<P: Into<PathBuf>>(path: P) -> Result<(Self, ConfigSource), EmbeddingError> {
        let path = path.into();
        if path.exists() {
            let config = Self::from_file(&path)?;
            Ok((config, ConfigSource::File(path)))
        } else {
            Ok((Self::default(), ConfigSource::Defaults(path)))
        }
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        let invalid = |message: &str| {
            Err(EmbeddingError::ConfigError {
                message: message.to_string(),
            })
        };

        if self.performance.max_workers == 0 {
            return invalid("performance.max_workers must be greater than zero");
        }
        if self.embedding.max_batch_size == 0 {
            return invalid("embedding.max_batch_size must be greater than zero");
        }
        if self.embedding.default_model.is_empty() {
            return invalid("embedding.default_model must not be empty");
        }
        let allowed = &self.embedding.allowed_models;
        if !allowed.is_empty() && !allowed.contains(&self.embedding.default_model) {
            return invalid("embedding.default_model is not in embedding.allowed_models");
        }
        self.models.validate()
    }
}
