//! Embedding Gateway Library
//!
//! gRPC inference gateway for text embeddings: lazily loaded models shared
//! across requests, with blocking inference offloaded to a bounded pool.

pub mod client;
pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pool;
pub mod protocol;
pub mod server;

// Re-exports
pub use client::{ClientError, EmbedGatewayClient};
pub use models::{
    Embedding, EmbeddingCoordinator, EmbeddingError, EmbeddingRequest, ModelLoader, ModelRegistry,
};
pub use pool::OffloadPool;
pub use protocol::{EmbedBatchRequest, EmbedBatchResponse, EmbedRequest, EmbedResponse};
pub use server::{EmbeddingServer, ServerConfig};
