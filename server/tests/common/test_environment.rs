#![allow(dead_code)]

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use server::config::ServerConfig;
use server::db::{MemoryScoreStore, ScoreStore};
use server::leaderboard_server::LeaderboardServer;

/// A test environment that runs a real server instance on an ephemeral port
pub struct TestEnvironment {
    server: LeaderboardServer,
    store: Arc<MemoryScoreStore>,
}

impl TestEnvironment {
    pub async fn new() -> Result<Self> {
        Self::with_top_k(common::DEFAULT_TOP_K).await
    }

    pub async fn with_top_k(default_top_k: usize) -> Result<Self> {
        let _ = tracing_subscriber::fmt::try_init();

        let config = ServerConfig {
            http_addr: "127.0.0.1:0".to_string(),
            default_top_k,
            store_timeout: Duration::from_secs(2),
            cache_sweep_interval: None,
            ..ServerConfig::default()
        };
        let store = Arc::new(MemoryScoreStore::new());
        let server = LeaderboardServer::start_with_store(config, store.clone() as Arc<dyn ScoreStore>).await?;

        Ok(Self { server, store })
    }

    pub fn ws_url(&self) -> String {
        self.server.ws_url()
    }

    /// The backing store, for seeding and assertions
    pub fn store(&self) -> &Arc<MemoryScoreStore> {
        &self.store
    }

    pub async fn shutdown(self) -> Result<()> {
        self.server.shutdown().await
    }
}
