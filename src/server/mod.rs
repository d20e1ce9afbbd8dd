//! Server module

pub mod config;
pub mod hyper_server;
pub mod server;

pub use config::{ConfigSource, ServerConfig};
pub use server::{EmbedService, EmbeddingServer};
