//! gRPC Embedding Server
//!
//! Serves `tei.v1.Embed` over plaintext HTTP/2 with a `grpc.health.v1`
//! endpoint next to it, and optionally the JSON gateway on its own port.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::coordinator::EmbeddingCoordinator;
use crate::models::model::ModelLoader;
use crate::models::{EmbeddingError, ErrorKind, ModelRegistry};
use crate::pool::OffloadPool;
use crate::protocol::embed_server::{Embed, EmbedServer};
use crate::protocol::{
    model_field, EmbedBatchRequest, EmbedBatchResponse, EmbedRequest, EmbedResponse, Embedding,
};
use crate::server::config::ServerConfig;
use crate::server::hyper_server::{bind_http_listener, serve_http};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Translate a coordinator failure into a gRPC status. The message starts
/// with the failure kind so clients can tell them apart.
pub fn to_status(error: EmbeddingError) -> Status {
    let kind = error.kind();
    let message = format!("{}: {}", kind.as_str(), error);
    match kind {
        ErrorKind::ModelLoad => Status::failed_precondition(message),
        ErrorKind::Inference => Status::internal(message),
        ErrorKind::PoolSaturated => Status::resource_exhausted(message),
        ErrorKind::PoolClosed => Status::unavailable(message),
        ErrorKind::InvalidInput => Status::invalid_argument(message),
        ErrorKind::Internal => Status::internal(message),
    }
}

/// `tei.v1.Embed` handlers
pub struct EmbedService {
    coordinator: Arc<EmbeddingCoordinator>,
}

impl EmbedService {
    pub fn new(coordinator: Arc<EmbeddingCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[tonic::async_trait]
impl Embed for EmbedService {
    async fn embed(
        &self,
        request: Request<EmbedRequest>,
    ) -> Result<Response<EmbedResponse>, Status> {
        let req = request.into_inner();
        debug!("Embed request, {} bytes", req.inputs.len());

        let embedding = self
            .coordinator
            .embed_text(&req.inputs, model_field(&req.model))
            .await
            .map_err(to_status)?;

        Ok(Response::new(EmbedResponse {
            embeddings: embedding,
        }))
    }

    async fn embed_batch(
        &self,
        request: Request<EmbedBatchRequest>,
    ) -> Result<Response<EmbedBatchResponse>, Status> {
        let req = request.into_inner();
        debug!("EmbedBatch request with {} inputs", req.inputs.len());

        let vectors = self
            .coordinator
            .embed_batch(req.inputs, model_field(&req.model))
            .await
            .map_err(to_status)?;

        Ok(Response::new(EmbedBatchResponse {
            embeddings: vectors
                .into_iter()
                .map(|values| Embedding { values })
                .collect(),
        }))
    }
}

/// Build the registry, pool and coordinator described by `config`
pub fn build_coordinator(
    config: &ServerConfig,
    loader: Arc<dyn ModelLoader>,
) -> (Arc<EmbeddingCoordinator>, Arc<OffloadPool>) {
    let registry = ModelRegistry::new(loader)
        .with_allowed_models(config.embedding.allowed_models.iter().cloned());
    let pool = Arc::new(
        OffloadPool::new(config.performance.max_workers)
            .with_max_queued(config.performance.max_queued_tasks),
    );
    let coordinator = EmbeddingCoordinator::with_limits(
        Arc::new(registry),
        Arc::clone(&pool),
        config.embedding.limits(),
    );
    (Arc::new(coordinator), pool)
}

pub struct EmbeddingServer {
    config: Arc<ServerConfig>,
    coordinator: Arc<EmbeddingCoordinator>,
    pool: Arc<OffloadPool>,
    listener: TcpListener,
    server_id: Uuid,
}

impl EmbeddingServer {
    /// Create a server backed by ONNX models from `config.models`
    #[cfg(feature = "onnx")]
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let loader = crate::models::model::onnx::OnnxModelLoader::new(config.models.clone());
        Self::with_loader(config, Arc::new(loader)).await
    }

    /// Create a server with a custom model loader and bind the gRPC port.
    /// Models are loaded lazily on first request.
    pub async fn with_loader(
        config: ServerConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, ServerError> {
        info!("🚀 Initializing Embedding Gateway");

        let (coordinator, pool) = build_coordinator(&config, loader);
        info!(
            "⚙️  Offload pool: {} workers, queue {}",
            pool.max_workers(),
            config
                .performance
                .max_queued_tasks
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );

        let listener = TcpListener::bind(&config.network.grpc_bind_address).await?;
        info!("📡 gRPC bound to {}", listener.local_addr()?);

        let server_id = Uuid::new_v4();
        info!("🆔 Server ID: {}", server_id);

        Ok(Self {
            config: Arc::new(config),
            coordinator,
            pool,
            listener,
            server_id,
        })
    }

    /// Address the gRPC listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn coordinator(&self) -> Arc<EmbeddingCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Serve until Ctrl-C
    pub async fn start(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("🛑 Shutdown requested");
        })
        .await
    }

    /// Serve until `shutdown` resolves, then drain in-flight inference.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let EmbeddingServer {
            config,
            coordinator,
            pool,
            listener,
            server_id,
        } = self;

        let (stop_http, mut http_stopped) = watch::channel(false);
        let http_task = match &config.network.http_bind_address {
            Some(address) => {
                let listener = bind_http_listener(address, config.network.tcp_nodelay)?;
                let coordinator = Arc::clone(&coordinator);
                Some(tokio::spawn(serve_http(listener, coordinator, async move {
                    let _ = http_stopped.changed().await;
                })))
            }
            None => None,
        };

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<EmbedServer<EmbedService>>()
            .await;

        let keepalive = config
            .network
            .http2_keepalive_interval_secs
            .map(Duration::from_secs);
        let incoming = TcpIncoming::from_listener(listener, config.network.tcp_nodelay, keepalive)?;

        info!("✅ Embedding Gateway {} ready", server_id);
        info!("📍 tei.v1.Embed/Embed, tei.v1.Embed/EmbedBatch");

        let served = Server::builder()
            .http2_keepalive_interval(keepalive)
            .add_service(health_service)
            .add_service(EmbedServer::new(EmbedService::new(coordinator)))
            .serve_with_incoming_shutdown(incoming, shutdown)
            .await;

        let _ = stop_http.send(true);
        if let Some(task) = http_task {
            match task.await {
                Ok(Err(e)) => error!("❌ HTTP gateway error: {}", e),
                Err(e) => error!("❌ HTTP gateway task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        pool.shutdown().await;
        info!("👋 Embedding Gateway stopped");
        served.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::{MockEmbeddingModel, MockModelLoader, FAIL_MARKER};
    use tonic::Code;

    fn service(loader: MockModelLoader) -> EmbedService {
        let config = ServerConfig::default();
        let (coordinator, _pool) = build_coordinator(&config, Arc::new(loader));
        EmbedService::new(coordinator)
    }

    #[test]
    fn test_status_codes_per_error_kind() {
        let status = to_status(EmbeddingError::ModelLoadError {
            model_name: "m".to_string(),
            error: "missing".to_string(),
        });
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(status.message().starts_with("model_load_error:"));

        let status = to_status(EmbeddingError::InferenceError {
            model_name: "m".to_string(),
            error: "bad".to_string(),
        });
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().starts_with("inference_error:"));

        assert_eq!(to_status(EmbeddingError::PoolSaturated { queued: 1 }).code(), Code::ResourceExhausted);
        assert_eq!(to_status(EmbeddingError::PoolClosed).code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_embed_uses_default_model() {
        let service = service(MockModelLoader::new(4));

        let response = service
            .embed(Request::new(EmbedRequest {
                inputs: "hello".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.embeddings, MockEmbeddingModel::vector_for("hello", 4));
        assert!(service
            .coordinator
            .registry()
            .is_loaded(crate::models::DEFAULT_MODEL_NAME));
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let service = service(MockModelLoader::new(4));
        let inputs: Vec<String> = (0..5).map(|i| format!("text {}", i)).collect();

        let response = service
            .embed_batch(Request::new(EmbedBatchRequest {
                inputs: inputs.clone(),
                model: "m".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();

        let values: Vec<Vec<f32>> = response.embeddings.into_iter().map(|e| e.values).collect();
        let expected: Vec<Vec<f32>> = inputs
            .iter()
            .map(|t| MockEmbeddingModel::vector_for(t, 4))
            .collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn test_failures_map_to_distinct_statuses() {
        let service = service(MockModelLoader::new(4).failing("gone"));

        let status = service
            .embed(Request::new(EmbedRequest {
                inputs: "x".to_string(),
                model: "gone".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let status = service
            .embed_batch(Request::new(EmbedBatchRequest {
                inputs: vec!["ok".to_string(), FAIL_MARKER.to_string()],
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);

        let status = service
            .embed_batch(Request::new(EmbedBatchRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
