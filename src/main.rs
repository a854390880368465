//! ptpip - PTP/IP camera daemon
//!
//! Connects to a responder and serves a line-oriented command socket.

mod server;

use ptpip_client::{Client, Config};
use server::CommandServer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if PTPIP_CONFIG is set, then env overrides)
    let config_path = std::env::var("PTPIP_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting ptpip daemon");
    tracing::info!("  Responder: {} ({})", config.responder.host, config.responder.vendor);
    tracing::info!(
        "  Ports: command-data {}, event {}, streamer {}",
        config.responder.command_data_port(),
        config.responder.event_port(),
        config.responder.streamer_port()
    );
    tracing::info!("  Bind address: {}", config.server.bind_addr);

    let connection_config = match config.connection_config().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    let client = Arc::new(Client::new(connection_config));
    client.connect().await?;
    if let Some(responder) = client.responder() {
        tracing::info!(
            "Connected to {} (connection {})",
            responder.friendly_name,
            responder.connection_number
        );
    }

    let server = Arc::new(CommandServer::new(config.server.bind_addr, client.clone()));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping daemon...");
        shutdown_server.shutdown();
    });

    // Run command socket (blocks until shutdown)
    server.run().await?;

    if let Err(e) = client.close().await {
        tracing::error!("Failed to close connection: {}", e);
    }

    tracing::info!("Daemon stopped");
    Ok(())
}
