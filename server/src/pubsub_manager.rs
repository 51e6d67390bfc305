use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{LeaderboardSnapshot, PartitionKey, ScoreTrigger};

use crate::broadcast::BroadcastCoordinator;
use crate::leaderboard_cache::LeaderboardCache;

/// Channel patterns for PubSub
pub mod channels {
    use common::PartitionKey;

    pub const LEADERBOARD_UPDATES_PATTERN: &str = "leaderboard:updates:*";

    pub fn leaderboard_updates(partition: &PartitionKey) -> String {
        format!("leaderboard:updates:{}", partition.group_id())
    }
}

/// A refreshed snapshot forwarded between server instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSnapshot {
    /// Instance that computed the snapshot; it ignores its own relays.
    pub origin: String,
    pub snapshot: LeaderboardSnapshot,
    pub trigger: Option<ScoreTrigger>,
}

/// Forwards refreshed snapshots over Redis so every instance can serve its
/// own subscribers without recomputing.
#[derive(Clone)]
pub struct PubSubManager {
    redis_conn: ConnectionManager,
    redis_url: String,
    instance_id: String,
}

impl PubSubManager {
    pub async fn new(redis_url: &str, instance_id: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let redis_conn = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;

        Ok(Self {
            redis_conn,
            redis_url: redis_url.to_string(),
            instance_id: instance_id.into(),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn publish_snapshot(&self, snapshot: &LeaderboardSnapshot, trigger: Option<&ScoreTrigger>) -> Result<()> {
        let channel = channels::leaderboard_updates(&snapshot.partition);
        let message = RelayedSnapshot {
            origin: self.instance_id.clone(),
            snapshot: snapshot.clone(),
            trigger: trigger.cloned(),
        };
        let data = serde_json::to_vec(&message).context("Failed to serialize snapshot")?;

        let mut conn = self.redis_conn.clone();
        let _: () = conn.publish(&channel, data).await.context("Failed to publish snapshot")?;

        debug!("Relayed {} snapshot to {}", snapshot.partition, channel);
        Ok(())
    }

    /// Listen for snapshots relayed by other instances, cache them, and hand
    /// them to local subscribers.
    pub fn spawn_snapshot_listener(
        &self,
        cache: Arc<LeaderboardCache>,
        coordinator: Arc<BroadcastCoordinator>,
        cancellation_token: CancellationToken,
    ) {
        let redis_url = self.redis_url.clone();
        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Snapshot relay listener shutting down");
                }
                result = handle_relayed_snapshots(redis_url, instance_id, cache, coordinator) => {
                    if let Err(e) = result {
                        error!("Snapshot relay listener failed: {}", e);
                    }
                }
            }
        });
    }
}

/// Handle the relay subscription in a separate task
async fn handle_relayed_snapshots(
    redis_url: String,
    instance_id: String,
    cache: Arc<LeaderboardCache>,
    coordinator: Arc<BroadcastCoordinator>,
) -> Result<()> {
    let client = Client::open(redis_url.as_str()).context("Failed to create Redis client for subscription")?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("Failed to create PubSub connection")?;

    pubsub
        .psubscribe(channels::LEADERBOARD_UPDATES_PATTERN)
        .await
        .context("Failed to subscribe to leaderboard updates")?;
    info!("Subscribed to {}", channels::LEADERBOARD_UPDATES_PATTERN);

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: Vec<u8> = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to read relay payload on {}: {}", msg.get_channel_name(), e);
                continue;
            }
        };
        let relayed = match serde_json::from_slice::<RelayedSnapshot>(&payload) {
            Ok(relayed) => relayed,
            Err(e) => {
                error!("Failed to deserialize relayed snapshot: {}", e);
                continue;
            }
        };
        if relayed.origin == instance_id {
            continue;
        }

        apply_relayed(&cache, &coordinator, relayed).await;
    }

    warn!("Relay subscription stream ended");
    Ok(())
}

/// Install a snapshot computed elsewhere. Returns the partition when it was
/// newer than what this instance holds and went out to local subscribers.
pub async fn apply_relayed(
    cache: &LeaderboardCache,
    coordinator: &BroadcastCoordinator,
    relayed: RelayedSnapshot,
) -> Option<PartitionKey> {
    let snapshot = Arc::new(relayed.snapshot);
    let partition = snapshot.partition;
    // A shallower remote snapshot cannot serve local subscribers with larger limits
    if snapshot.depth < cache.depth_for(&partition).await {
        debug!("Ignoring relayed {} snapshot of depth {}", partition, snapshot.depth);
        return None;
    }
    if !cache.put(snapshot.clone()).await {
        return None;
    }
    coordinator.publish_local(snapshot, relayed.trigger).await;
    Some(partition)
}
