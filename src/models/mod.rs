//! Embedding models: the inference capability seam, the lazy model registry
//! and the coordinator that ties a request to a model and the offload pool.

pub mod config;
pub mod coordinator;
pub mod mock;
pub mod model;
pub mod registry;

// Re-exports
pub use config::{EmbeddingModelsConfig, ModelOverride};
pub use coordinator::{EmbeddingCoordinator, EmbeddingOutput, EmbeddingRequest};
pub use model::{EmbeddingModel, ModelHandle, ModelInfo, ModelLoader};
pub use registry::ModelRegistry;

/// Model used when a request does not name one
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors that can occur while serving embeddings.
///
/// Payloads are plain strings so one failure can be handed to every caller
/// that was waiting on the same model load.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model loading failed: {model_name} - {error}")]
    ModelLoadError { model_name: String, error: String },

    #[error("Inference failed: {model_name} - {error}")]
    InferenceError { model_name: String, error: String },

    #[error("Offload pool saturated: {queued} tasks already waiting")]
    PoolSaturated { queued: usize },

    #[error("Offload pool is shut down")]
    PoolClosed,

    #[error("Offloaded task did not complete: {error}")]
    WorkerFailed { error: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {error}")]
    IoError { error: String },
}

/// Coarse classification of an [`EmbeddingError`], used by the RPC layers
/// to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ModelLoad,
    Inference,
    PoolSaturated,
    PoolClosed,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    /// Stable tag used as a message prefix on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ModelLoad => "model_load_error",
            ErrorKind::Inference => "inference_error",
            ErrorKind::PoolSaturated => "pool_saturated",
            ErrorKind::PoolClosed => "pool_closed",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl EmbeddingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmbeddingError::ModelLoadError { .. } => ErrorKind::ModelLoad,
            EmbeddingError::InferenceError { .. } => ErrorKind::Inference,
            EmbeddingError::PoolSaturated { .. } => ErrorKind::PoolSaturated,
            EmbeddingError::PoolClosed => ErrorKind::PoolClosed,
            EmbeddingError::InvalidInput { .. } => ErrorKind::InvalidInput,
            EmbeddingError::WorkerFailed { .. }
            | EmbeddingError::ConfigError { .. }
            | EmbeddingError::IoError { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn load(model_name: &str, error: impl ToString) -> Self {
        EmbeddingError::ModelLoadError {
            model_name: model_name.to_string(),
            error: error.to_string(),
        }
    }

    pub(crate) fn inference(model_name: &str, error: impl ToString) -> Self {
        EmbeddingError::InferenceError {
            model_name: model_name.to_string(),
            error: error.to_string(),
        }
    }
}

impl From<std::io::Error> for EmbeddingError {
    fn from(error: std::io::Error) -> Self {
        EmbeddingError::IoError { error: error.to_string() }
    }
}

impl From<toml::de::Error> for EmbeddingError {
    fn from(error: toml::de::Error) -> Self {
        EmbeddingError::ConfigError { message: error.to_string() }
    }
}
