//! Embedding Gateway Main
//!
//! Entry point for the gRPC embedding gateway

use embedding_gateway::server::config::ConfigSource;
use embedding_gateway::{EmbeddingServer, ServerConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let (config, source) = ServerConfig::load()?;

    // Initialize tracing
    let log_level = match config.monitoring.log_level.to_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => {
            format!("embedding_gateway={level},{level}")
        }
        _ => "embedding_gateway=info,info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .init();

    match &source {
        ConfigSource::File(path) => info!("📄 Loaded config from {}", path.display()),
        ConfigSource::Defaults(path) => {
            warn!("Config file {} not found, using defaults", path.display())
        }
    }

    println!("🚀 Embedding Gateway");
    println!("📊 Log Level: {}", config.monitoring.log_level);
    println!("===============================");

    let server = EmbeddingServer::new(config).await?;

    println!("✅ Server created successfully!");
    println!("📡 Ready to accept embedding requests");
    println!("🛑 Press Ctrl+C to stop");

    server.start().await?;

    Ok(())
}
