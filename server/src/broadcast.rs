use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use common::{LeaderboardSnapshot, PartitionKey, ScoreTrigger, ServerMessage};

use crate::error::Result;
use crate::pubsub_manager::PubSubManager;
use crate::subscription_registry::{Subscribed, SubscriptionRegistry};
use crate::update_processor::SnapshotListener;

/// Pushes refreshed snapshots to the subscribers of their partition.
///
/// Snapshots for one partition go out in `generated_at` order; an older
/// snapshot that arrives after a newer one was published is dropped.
pub struct BroadcastCoordinator {
    registry: Arc<SubscriptionRegistry>,
    relay: Option<PubSubManager>,
    published: Mutex<HashMap<PartitionKey, Arc<Mutex<Option<DateTime<Utc>>>>>>,
}

impl BroadcastCoordinator {
    pub fn new(registry: Arc<SubscriptionRegistry>, relay: Option<PubSubManager>) -> Self {
        Self {
            registry,
            relay,
            published: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    async fn partition_slot(&self, partition: PartitionKey) -> Arc<Mutex<Option<DateTime<Utc>>>> {
        let mut published = self.published.lock().await;
        published.entry(partition).or_default().clone()
    }

    /// Subscribe `connection` and queue its initial frame.
    ///
    /// Runs under the partition's publish lock: no broadcast lands between
    /// joining and the initial frame, and nothing older than that frame is
    /// published to the partition afterwards.
    pub async fn subscribe(
        &self,
        connection: &str,
        partition: PartitionKey,
        limit: Option<usize>,
    ) -> Result<Subscribed> {
        let slot = self.partition_slot(partition).await;
        let mut last = slot.lock().await;

        let subscribed = self.registry.subscribe(connection, partition, limit).await?;
        let frame = subscribed.initial_frame();
        if let Err(e) = self.registry.transport().send_to_connection(connection, frame).await {
            self.registry.unsubscribe(connection, partition).await;
            return Err(e);
        }

        let generated_at = subscribed.snapshot.generated_at;
        if last.is_none_or(|at| at < generated_at) {
            *last = Some(generated_at);
        }
        Ok(subscribed)
    }

    /// Deliver locally and forward to other instances.
    pub async fn publish(&self, snapshot: Arc<LeaderboardSnapshot>, trigger: Option<ScoreTrigger>) {
        if let Some(relay) = &self.relay {
            if let Err(e) = relay.publish_snapshot(&snapshot, trigger.as_ref()).await {
                warn!("Failed to relay snapshot for {}: {}", snapshot.partition, e);
            }
        }
        self.publish_local(snapshot, trigger).await;
    }

    /// Deliver `snapshot` to this instance's subscribers. Returns how many
    /// connections it reached.
    pub async fn publish_local(&self, snapshot: Arc<LeaderboardSnapshot>, trigger: Option<ScoreTrigger>) -> usize {
        let partition = snapshot.partition;
        let slot = self.partition_slot(partition).await;
        // Held through the fan-out so frames of one partition never interleave
        let mut last = slot.lock().await;
        if last.is_some_and(|at| snapshot.generated_at < at) {
            debug!("Skipping out-of-date snapshot for {}", partition);
            return 0;
        }
        *last = Some(snapshot.generated_at);

        let members = self.registry.members_of(partition).await;
        if members.is_empty() {
            trace!("No subscribers for {}", partition);
            return 0;
        }

        let transport = self.registry.transport();
        let mut limits: Vec<usize> = members.iter().map(|(_, k)| *k).collect();
        limits.sort_unstable();
        limits.dedup();

        let failures = if let &[limit] = limits.as_slice() {
            let frame = ServerMessage::leaderboard_update(&snapshot, limit, trigger);
            transport.send_to_group(&partition.group_id(), frame).await
        } else {
            let frames: HashMap<usize, ServerMessage> = limits
                .iter()
                .map(|&k| (k, ServerMessage::leaderboard_update(&snapshot, k, trigger.clone())))
                .collect();
            let sends = members.iter().map(|(id, k)| {
                let frame = frames[k].clone();
                async move {
                    transport
                        .send_to_connection(id, frame)
                        .await
                        .err()
                        .map(|e| (id.clone(), e))
                }
            });
            join_all(sends).await.into_iter().flatten().collect()
        };

        for (id, e) in &failures {
            warn!("Failed to deliver {} update to {}: {}", partition, id, e);
        }
        let delivered = members.len().saturating_sub(failures.len());
        debug!("Published {} to {}/{} subscribers", partition, delivered, members.len());
        delivered
    }
}

#[async_trait]
impl SnapshotListener for BroadcastCoordinator {
    async fn on_refresh(&self, snapshot: Arc<LeaderboardSnapshot>, trigger: Option<ScoreTrigger>) {
        self.publish(snapshot, trigger).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryScoreStore, ScoreStore};
    use crate::error::LeaderboardError;
    use crate::leaderboard_cache::LeaderboardCache;
    use crate::refresher::PartitionRefresher;
    use crate::transport::{ConnectionHub, Transport};
    use chrono::Duration as ChronoDuration;
    use common::{GameMode, PlayerKey, Region};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        refresher: Arc<PartitionRefresher>,
        hub: Arc<ConnectionHub>,
        coordinator: BroadcastCoordinator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryScoreStore::new());
        for i in 0..12 {
            let key = PlayerKey::new(format!("p{:02}", i), Region::NorthAmerica, GameMode::Squad);
            store.upsert_increment(&key, 100 + i, "player").await.unwrap();
        }
        let cache = Arc::new(LeaderboardCache::new(10));
        let refresher = Arc::new(PartitionRefresher::new(store, cache, Duration::from_secs(1)));
        let hub = Arc::new(ConnectionHub::new());
        let registry = Arc::new(SubscriptionRegistry::new(refresher.clone(), hub.clone()));
        Fixture {
            refresher,
            hub,
            coordinator: BroadcastCoordinator::new(registry, None),
        }
    }

    fn na_squad() -> PartitionKey {
        PartitionKey::scoped(Region::NorthAmerica, GameMode::Squad)
    }

    /// Register and subscribe a connection, consuming its initial frame.
    async fn connect(f: &Fixture, id: &str, limit: Option<usize>) -> mpsc::Receiver<ServerMessage> {
        let (tx, mut rx) = mpsc::channel(8);
        f.hub.register(id, tx).await;
        f.coordinator.subscribe(id, na_squad(), limit).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMessage::LeaderboardUpdate { .. })));
        rx
    }

    fn player_count(frame: &ServerMessage) -> usize {
        match frame {
            ServerMessage::LeaderboardUpdate { players, .. } => players.len(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_identical_frames() {
        let f = fixture().await;
        let mut rx1 = connect(&f, "c1", None).await;
        let mut rx2 = connect(&f, "c2", None).await;

        let refreshed = f.refresher.refresh(na_squad()).await.unwrap();
        assert_eq!(f.coordinator.publish_local(refreshed.snapshot, None).await, 2);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(player_count(&a), 10);
    }

    #[tokio::test]
    async fn test_frames_are_truncated_per_subscriber() {
        let f = fixture().await;
        let mut small = connect(&f, "small", Some(3)).await;
        let mut large = connect(&f, "large", Some(12)).await;

        let refreshed = f.refresher.refresh(na_squad()).await.unwrap();
        f.coordinator.publish_local(refreshed.snapshot, None).await;

        assert_eq!(player_count(&small.recv().await.unwrap()), 3);
        assert_eq!(player_count(&large.recv().await.unwrap()), 12);
    }

    #[tokio::test]
    async fn test_dead_connection_does_not_block_others() {
        let f = fixture().await;
        let mut alive = connect(&f, "alive", None).await;
        let dead = connect(&f, "dead", None).await;
        drop(dead);

        let refreshed = f.refresher.refresh(na_squad()).await.unwrap();
        assert_eq!(f.coordinator.publish_local(refreshed.snapshot, None).await, 1);
        assert!(alive.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_older_snapshot_is_not_published_after_newer() {
        let f = fixture().await;
        let mut rx = connect(&f, "c1", None).await;

        let newer = f.refresher.refresh(na_squad()).await.unwrap().snapshot;
        let mut older = (*newer).clone();
        older.generated_at = newer.generated_at - ChronoDuration::seconds(1);

        assert_eq!(f.coordinator.publish_local(newer, None).await, 1);
        assert_eq!(f.coordinator.publish_local(Arc::new(older), None).await, 0);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_trigger_is_attached() {
        let f = fixture().await;
        let mut rx = connect(&f, "c1", None).await;
        let trigger = ScoreTrigger {
            player_id: "p01".to_string(),
            region: Region::NorthAmerica,
            game_mode: GameMode::Squad,
            score_delta: 5,
        };

        let snapshot = f.refresher.refresh(na_squad()).await.unwrap().snapshot;
        f.coordinator.on_refresh(snapshot, Some(trigger.clone())).await;

        match rx.recv().await.unwrap() {
            ServerMessage::LeaderboardUpdate { trigger: got, .. } => assert_eq!(got, Some(trigger)),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_frame_is_queued_and_fences_older_snapshots() {
        let f = fixture().await;
        let cached = f.refresher.refresh(na_squad()).await.unwrap().snapshot;

        let (tx, mut rx) = mpsc::channel(8);
        f.hub.register("c1", tx).await;
        let subscribed = f.coordinator.subscribe("c1", na_squad(), Some(5)).await.unwrap();
        assert!(Arc::ptr_eq(&subscribed.snapshot, &cached));

        match rx.recv().await.unwrap() {
            ServerMessage::LeaderboardUpdate { players, timestamp, .. } => {
                assert_eq!(players.len(), 5);
                assert_eq!(timestamp, cached.generated_at);
            }
            other => panic!("unexpected frame {:?}", other),
        }

        // A snapshot computed before the one the subscriber already holds never follows it
        let mut older = (*cached).clone();
        older.generated_at = cached.generated_at - ChronoDuration::seconds(1);
        assert_eq!(f.coordinator.publish_local(Arc::new(older), None).await, 0);
        assert!(rx.try_recv().is_err());

        // The same snapshot may be published again
        assert_eq!(f.coordinator.publish_local(cached, None).await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_with_dead_mailbox_rolls_back() {
        let f = fixture().await;
        let (tx, rx) = mpsc::channel(8);
        f.hub.register("gone", tx).await;
        drop(rx);

        let result = f.coordinator.subscribe("gone", na_squad(), None).await;
        assert!(matches!(result, Err(LeaderboardError::Transport(_))));
        assert!(f.coordinator.registry().members_of(na_squad()).await.is_empty());
    }
}
