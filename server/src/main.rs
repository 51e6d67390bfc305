use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::config::ServerConfig;
use server::leaderboard_server::LeaderboardServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    info!("Starting leaderboard server on {}", config.http_addr);

    let server = LeaderboardServer::start(config).await?;
    info!("WebSocket endpoint: {}", server.ws_url());

    // Wait for shutdown signal
    info!("Server started. Waiting for shutdown signal (Ctrl+C)...");
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal. Shutting down gracefully...");
    server.shutdown().await?;

    info!("Server shut down successfully");
    Ok(())
}
