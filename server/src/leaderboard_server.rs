use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::BroadcastCoordinator;
use crate::config::ServerConfig;
use crate::db::{MemoryScoreStore, PostgresScoreStore, ScoreStore};
use crate::http_server::{HttpServerState, run_http_server};
use crate::leaderboard_cache::LeaderboardCache;
use crate::pubsub_manager::PubSubManager;
use crate::refresher::PartitionRefresher;
use crate::subscription_registry::SubscriptionRegistry;
use crate::transport::ConnectionHub;
use crate::update_processor::UpdateProcessor;

/// A running leaderboard instance with all of its background tasks
pub struct LeaderboardServer {
    /// Unique id of this instance, used to tag relayed snapshots
    instance_id: String,
    http_addr: SocketAddr,
    /// Cancellation token for graceful shutdown
    cancellation_token: CancellationToken,
    /// Handles for all spawned tasks
    handles: Vec<JoinHandle<()>>,
}

impl LeaderboardServer {
    /// Connect the configured store and start serving.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let store: Arc<dyn ScoreStore> = match &config.database {
            Some(database) => {
                info!("Connecting to PostgreSQL at {}:{}", database.host, database.port);
                Arc::new(PostgresScoreStore::connect(database).await?)
            }
            None => {
                warn!("No database configured, scores are kept in memory only");
                Arc::new(MemoryScoreStore::new())
            }
        };
        Self::start_with_store(config, store).await
    }

    /// Start serving on top of an already constructed store.
    pub async fn start_with_store(config: ServerConfig, store: Arc<dyn ScoreStore>) -> Result<Self> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let cancellation_token = CancellationToken::new();
        let mut handles = Vec::new();

        let cache = Arc::new(LeaderboardCache::new(config.default_top_k));
        let refresher = Arc::new(PartitionRefresher::new(store.clone(), cache.clone(), config.store_timeout));
        let hub = Arc::new(ConnectionHub::new());
        let registry = Arc::new(SubscriptionRegistry::new(refresher.clone(), hub.clone()));

        let relay = match &config.redis_url {
            Some(redis_url) => {
                info!("Relaying leaderboard snapshots through Redis");
                Some(
                    PubSubManager::new(redis_url, instance_id.clone())
                        .await
                        .context("Failed to connect snapshot relay")?,
                )
            }
            None => None,
        };
        let coordinator = Arc::new(BroadcastCoordinator::new(registry.clone(), relay.clone()));
        let processor = Arc::new(UpdateProcessor::new(refresher.clone(), coordinator.clone()));

        if let Some(relay) = &relay {
            relay.spawn_snapshot_listener(cache.clone(), coordinator.clone(), cancellation_token.clone());
        }
        if let Some(period) = config.cache_sweep_interval {
            cache.clone().spawn_sweep_task(period, cancellation_token.clone());
        }

        let listener = TcpListener::bind(&config.http_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.http_addr))?;
        let http_addr = listener.local_addr().context("Failed to read bound address")?;

        let state = HttpServerState {
            store,
            refresher,
            processor,
            registry,
            coordinator,
            hub,
            store_timeout: config.store_timeout,
            default_top_k: config.default_top_k,
            cancellation_token: cancellation_token.clone(),
        };
        let cors_origins = config.cors_origins.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_http_server(listener, state, cors_origins).await {
                error!("HTTP server failed: {}", e);
            }
        }));

        info!("Leaderboard server {} listening on {}", instance_id, http_addr);
        Ok(Self {
            instance_id,
            http_addr,
            cancellation_token,
            handles,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.http_addr)
    }

    /// Stop accepting work, tell connected clients, and wait for tasks to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Starting graceful shutdown of leaderboard server {}", self.instance_id);
        self.cancellation_token.cancel();

        while let Some(handle) = self.handles.pop() {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Service panicked during shutdown: {:?}", e),
                Err(_) => error!("Service shutdown timed out"),
            }
        }

        info!("Leaderboard server {} shut down gracefully", self.instance_id);
        Ok(())
    }
}
