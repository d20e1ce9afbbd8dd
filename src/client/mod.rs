//! gRPC client for the `tei.v1.Embed` service

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::protocol::embed_client::EmbedClient;
use crate::protocol::{EmbedBatchRequest, EmbedRequest};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:50051";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid endpoint {endpoint}: {error}")]
    InvalidEndpoint { endpoint: String, error: String },

    #[error("Connection failed: {0}")]
    Connection(#[from] tonic::transport::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Expected {expected} embeddings, server returned {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Thin wrapper over the generated client. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EmbedGatewayClient {
    inner: EmbedClient<Channel>,
}

impl EmbedGatewayClient {
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| ClientError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                error: e.to_string(),
            })?
            .connect_timeout(Duration::from_secs(5))
            .tcp_nodelay(true)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10))
            .connect()
            .await?;

        debug!("Connected to {}", endpoint);
        Ok(Self {
            inner: EmbedClient::new(channel),
        })
    }

    /// Embed one text; `None` selects the server's default model.
    pub async fn embed(&mut self, text: &str, model: Option<&str>) -> Result<Vec<f32>, ClientError> {
        let request = EmbedRequest {
            inputs: text.to_string(),
            model: model.unwrap_or_default().to_string(),
            ..Default::default()
        };
        let response = self.inner.embed(request).await?.into_inner();
        Ok(response.embeddings)
    }

    /// Embed several texts with one model; vectors come back in input order.
    pub async fn embed_batch(
        &mut self,
        texts: Vec<String>,
        model: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ClientError> {
        let expected = texts.len();
        let request = EmbedBatchRequest {
            inputs: texts,
            model: model.unwrap_or_default().to_string(),
            ..Default::default()
        };

        let response = self.inner.embed_batch(request).await?.into_inner();
        if response.embeddings.len() != expected {
            return Err(ClientError::CountMismatch {
                expected,
                actual: response.embeddings.len(),
            });
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}
