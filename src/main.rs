use std::sync::Arc;

use bidrelay_server::{channel, ServerConfig};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting bid relay server");

    let config = ServerConfig::default();
    let handle = bidrelay_server::start(config)
        .await
        .expect("Failed to start relay server");

    // Optional Redis subscriber for decoupled backend integration
    let _channel = match std::env::var("REDIS_URL") {
        Ok(url) => Some(channel::spawn_listener(
            url,
            Arc::clone(&handle.broadcaster),
        )),
        Err(_) => {
            tracing::info!("REDIS_URL not set, running in HTTP-only mode");
            None
        }
    };

    tracing::info!(port = handle.port, "Relay ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
