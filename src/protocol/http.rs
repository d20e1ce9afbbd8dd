//! HTTP/JSON protocol
//!
//! Optional JSON surface over the same coordinator as the gRPC service:
//! - `POST /embed` `{"text": "...", "model": "..."}` -> `{"embedding": [...], "model": "..."}`
//! - `POST /embed_batch` `{"texts": [...], "model": "..."}` -> `{"embeddings": [[...]], "model": "..."}`
//! - `GET /health`

use hyper::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::{EmbeddingError, ErrorKind};
use crate::pool::PoolStats;

/// HTTP single-text embedding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedRequest {
    /// Text to embed
    pub text: String,

    /// Optional model name; the default model is used when absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// HTTP batch embedding request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedBatchRequest {
    pub texts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedResponse {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Model that produced it
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbedBatchResponse {
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

/// HTTP Error Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,

    /// Error code (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Additional details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HttpErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            details: None,
        }
    }

    /// Create error with code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found() -> Self {
        Self::new("Not Found").with_code("NOT_FOUND")
    }

    pub fn invalid_json(details: impl Into<String>) -> Self {
        Self::new("Invalid JSON")
            .with_code("INVALID_JSON")
            .with_details(details)
    }

    /// Status code and body for a coordinator failure
    pub fn from_embedding_error(error: &EmbeddingError) -> (StatusCode, Self) {
        let kind = error.kind();
        let status = match kind {
            ErrorKind::ModelLoad => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Inference => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::PoolSaturated => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Self::new(error.to_string()).with_code(kind.as_str().to_uppercase());
        (status, body)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub default_model: String,
    pub loaded_models: Vec<String>,
    pub pool: PoolStats,
}

impl HealthResponse {
    pub fn new(default_model: impl Into<String>, loaded_models: Vec<String>, pool: PoolStats) -> Self {
        let status = if pool.closed { "shutting_down" } else { "healthy" };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_model: default_model.into(),
            loaded_models,
            pool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_model_is_optional() {
        let req: HttpEmbedRequest = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(req.text, "hi");
        assert!(req.model.is_none());

        let batch: HttpEmbedBatchRequest =
            serde_json::from_str(r#"{"texts": ["a", "b"], "model": "m"}"#).unwrap();
        assert_eq!(batch.texts.len(), 2);
        assert_eq!(batch.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_error_response() {
        let err = HttpErrorResponse::new("Test error")
            .with_code("TEST_ERROR")
            .with_details("Additional details");

        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, Some("TEST_ERROR".to_string()));
        assert_eq!(err.details, Some("Additional details".to_string()));
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, body) = HttpErrorResponse::from_embedding_error(&EmbeddingError::ModelLoadError {
            model_name: "m".to_string(),
            error: "missing".to_string(),
        });
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code.as_deref(), Some("MODEL_LOAD_ERROR"));

        let (status, _) =
            HttpErrorResponse::from_embedding_error(&EmbeddingError::PoolSaturated { queued: 9 });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
