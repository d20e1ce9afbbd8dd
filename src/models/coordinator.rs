//! Embedding coordinator
//!
//! Single entry point for both RPC shapes: a one-text request and a batch
//! request go through the same [`EmbeddingCoordinator::embed`] call, so model
//! resolution and offloading never differ between them.
//!
//! Per request: Received -> ModelResolving -> Queued -> Running -> Completed,
//! or Failed from any stage after Received. Nothing is retried here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn, Span};
use uuid::Uuid;

use crate::models::registry::ModelRegistry;
use crate::models::{Embedding, EmbeddingError, EmbeddingResult, DEFAULT_MODEL_NAME};
use crate::pool::{OffloadPool, PoolStats};

/// Request limits enforced before any model work starts
#[derive(Debug, Clone)]
pub struct CoordinatorLimits {
    /// Model used when a request names none
    pub default_model: String,
    /// Largest accepted batch
    pub max_batch_size: usize,
    /// Longest accepted text, in bytes
    pub max_text_length: usize,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL_NAME.to_string(),
            max_batch_size: 256,
            max_text_length: 8192,
        }
    }
}

/// Ordered texts to embed with one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    /// Model name; `None` or empty selects the default model
    #[serde(default)]
    pub model: Option<String>,
}

impl EmbeddingRequest {
    pub fn new(texts: Vec<String>, model: Option<String>) -> Self {
        Self { texts, model }
    }

    /// A request carrying exactly one text
    pub fn single(text: impl Into<String>, model: Option<String>) -> Self {
        Self::new(vec![text.into()], model)
    }
}

/// One vector per input text, in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    /// Model that produced the vectors
    pub model: String,
    pub vectors: Vec<Embedding>,
}

/// Resolves a request's model, runs inference on the offload pool and
/// assembles the result
pub struct EmbeddingCoordinator {
    registry: Arc<ModelRegistry>,
    pool: Arc<OffloadPool>,
    limits: CoordinatorLimits,
}

impl EmbeddingCoordinator {
    pub fn new(registry: Arc<ModelRegistry>, pool: Arc<OffloadPool>) -> Self {
        Self::with_limits(registry, pool, CoordinatorLimits::default())
    }

    pub fn with_limits(
        registry: Arc<ModelRegistry>,
        pool: Arc<OffloadPool>,
        limits: CoordinatorLimits,
    ) -> Self {
        Self {
            registry,
            pool,
            limits,
        }
    }

    /// Get the model registry
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn default_model(&self) -> &str {
        &self.limits.default_model
    }

    /// The model a request will be served by
    pub fn resolve_model_name<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        match model {
            Some(name) if !name.is_empty() => name,
            _ => &self.limits.default_model,
        }
    }

    /// Embed every text of `request` with a single inference call.
    #[instrument(
        name = "embed",
        skip(self, request),
        fields(request_id = %Uuid::new_v4(), model = tracing::field::Empty, texts = request.texts.len())
    )]
    pub async fn embed(&self, request: EmbeddingRequest) -> EmbeddingResult<EmbeddingOutput> {
        debug!("received");
        let result = self.run(request).await;
        match &result {
            Ok(output) => debug!(vectors = output.vectors.len(), "completed"),
            Err(e) => warn!(kind = e.kind().as_str(), "failed: {}", e),
        }
        result
    }

    async fn run(&self, request: EmbeddingRequest) -> EmbeddingResult<EmbeddingOutput> {
        self.validate(&request.texts)?;

        let model_name = self
            .resolve_model_name(request.model.as_deref())
            .to_string();
        Span::current().record("model", model_name.as_str());

        debug!("model resolving");
        let handle = self.registry.get_or_create(&model_name).await?;

        debug!("queued");
        let texts = request.texts;
        let expected = texts.len();
        let span = Span::current();
        let vectors = self
            .pool
            .submit(move || {
                span.in_scope(|| {
                    debug!("running");
                    handle.embed(&texts)
                })
            })
            .await?;

        if vectors.len() != expected {
            return Err(EmbeddingError::inference(
                &model_name,
                format!("returned {} vectors for {} inputs", vectors.len(), expected),
            ));
        }

        Ok(EmbeddingOutput {
            model: model_name,
            vectors,
        })
    }

    fn validate(&self, texts: &[String]) -> EmbeddingResult<()> {
        if texts.is_empty() {
            return Err(EmbeddingError::InvalidInput {
                message: "at least one input text is required".to_string(),
            });
        }
        if texts.len() > self.limits.max_batch_size {
            return Err(EmbeddingError::InvalidInput {
                message: format!(
                    "batch of {} exceeds the maximum of {}",
                    texts.len(),
                    self.limits.max_batch_size
                ),
            });
        }
        if let Some((index, text)) = texts
            .iter()
            .enumerate()
            .find(|(_, text)| text.len() > self.limits.max_text_length)
        {
            return Err(EmbeddingError::InvalidInput {
                message: format!(
                    "input {} is {} bytes, the maximum is {}",
                    index,
                    text.len(),
                    self.limits.max_text_length
                ),
            });
        }
        Ok(())
    }

    /// Embed one text
    pub async fn embed_text(&self, text: &str, model: Option<&str>) -> EmbeddingResult<Embedding> {
        let request = EmbeddingRequest::single(text, model.map(str::to_string));
        let output = self.embed(request).await?;
        output.vectors.into_iter().next().ok_or_else(|| {
            EmbeddingError::inference(self.resolve_model_name(model), "no embedding returned")
        })
    }

    /// Embed a batch of texts
    pub async fn embed_batch(
        &self,
        texts: Vec<String>,
        model: Option<&str>,
    ) -> EmbeddingResult<Vec<Embedding>> {
        let request = EmbeddingRequest::new(texts, model.map(str::to_string));
        Ok(self.embed(request).await?.vectors)
    }
}
