use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use common::{LeaderboardSnapshot, PartitionKey};

#[derive(Debug, Default)]
struct CacheEntry {
    snapshot: Option<Arc<LeaderboardSnapshot>>,
    /// Snapshots generated before this instant are refused.
    watermark: Option<DateTime<Utc>>,
}

/// Latest top-K snapshot per partition.
///
/// Snapshots are replaced whole, never edited. `put` follows
/// last-writer-wins by `generated_at`: a snapshot older than what the entry
/// has already seen (stored or invalidated) is dropped.
pub struct LeaderboardCache {
    entries: RwLock<HashMap<PartitionKey, CacheEntry>>,
    /// Largest K requested per partition; refreshes compute this many rows.
    depths: RwLock<HashMap<PartitionKey, usize>>,
    default_depth: usize,
}

impl LeaderboardCache {
    pub fn new(default_depth: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            depths: RwLock::new(HashMap::new()),
            default_depth,
        }
    }

    pub fn default_depth(&self) -> usize {
        self.default_depth
    }

    pub async fn get(&self, key: &PartitionKey) -> Option<Arc<LeaderboardSnapshot>> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|entry| entry.snapshot.clone())
    }

    /// Store `snapshot` under its partition. Returns false if it was stale and discarded.
    pub async fn put(&self, snapshot: Arc<LeaderboardSnapshot>) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(snapshot.partition).or_default();

        if let Some(watermark) = entry.watermark {
            if snapshot.generated_at < watermark {
                debug!(
                    "Discarding stale snapshot for {} ({} < {})",
                    snapshot.partition, snapshot.generated_at, watermark
                );
                return false;
            }
        }

        entry.watermark = Some(snapshot.generated_at);
        entry.snapshot = Some(snapshot);
        true
    }

    /// Drop the snapshot for `key`. Refreshes that started before now can no longer land.
    pub async fn invalidate(&self, key: &PartitionKey) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(*key).or_default();
        entry.snapshot = None;
        entry.watermark = Some(entry.watermark.map_or(Utc::now(), |w| w.max(Utc::now())));
        debug!("Invalidated leaderboard cache for {}", key);
    }

    /// Drop every snapshot. Memory hygiene only; readers recompute lazily.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.values_mut() {
            entry.snapshot = None;
        }
    }

    pub async fn cached_partitions(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|entry| entry.snapshot.is_some()).count()
    }

    /// Depth refreshes of `key` should compute.
    pub async fn depth_for(&self, key: &PartitionKey) -> usize {
        let depths = self.depths.read().await;
        depths.get(key).copied().unwrap_or(self.default_depth)
    }

    /// Record that someone wants `k` rows of `key`. Returns the resulting depth.
    pub async fn request_depth(&self, key: &PartitionKey, k: usize) -> usize {
        let mut depths = self.depths.write().await;
        let depth = depths.entry(*key).or_insert(self.default_depth);
        if k > *depth {
            *depth = k;
        }
        *depth
    }

    /// Start background full-clear task
    pub fn spawn_sweep_task(self: Arc<Self>, period: Duration, cancellation_token: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Leaderboard cache sweep task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let cached = self.cached_partitions().await;
                        self.clear().await;
                        debug!("Leaderboard cache swept, {} snapshots dropped", cached);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{GameMode, Region};

    fn snapshot(partition: PartitionKey, generated_at: DateTime<Utc>) -> Arc<LeaderboardSnapshot> {
        Arc::new(LeaderboardSnapshot::from_ranked(partition, vec![], 10, generated_at))
    }

    fn na_solo() -> PartitionKey {
        PartitionKey::scoped(Region::NorthAmerica, GameMode::Solo)
    }

    #[tokio::test]
    async fn test_get_put_invalidate() {
        let cache = LeaderboardCache::new(10);
        assert!(cache.get(&na_solo()).await.is_none());

        let snap = snapshot(na_solo(), Utc::now());
        assert!(cache.put(snap.clone()).await);
        assert_eq!(cache.get(&na_solo()).await, Some(snap));
        assert!(cache.get(&PartitionKey::Global).await.is_none());

        cache.invalidate(&na_solo()).await;
        assert!(cache.get(&na_solo()).await.is_none());
    }

    #[tokio::test]
    async fn test_older_snapshot_is_discarded() {
        let cache = LeaderboardCache::new(10);
        let now = Utc::now();

        assert!(cache.put(snapshot(na_solo(), now)).await);
        assert!(!cache.put(snapshot(na_solo(), now - ChronoDuration::seconds(1))).await);
        assert_eq!(cache.get(&na_solo()).await.unwrap().generated_at, now);

        // Equal timestamps replace
        assert!(cache.put(snapshot(na_solo(), now)).await);
    }

    #[tokio::test]
    async fn test_invalidate_fences_in_flight_refreshes() {
        let cache = LeaderboardCache::new(10);
        let started = Utc::now() - ChronoDuration::milliseconds(50);

        cache.invalidate(&na_solo()).await;
        assert!(!cache.put(snapshot(na_solo(), started)).await);
        assert!(cache.put(snapshot(na_solo(), Utc::now())).await);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = LeaderboardCache::new(10);
        cache.put(snapshot(na_solo(), Utc::now())).await;
        cache.put(snapshot(PartitionKey::Global, Utc::now())).await;
        cache.request_depth(&na_solo(), 50).await;
        assert_eq!(cache.cached_partitions().await, 2);

        cache.clear().await;
        assert_eq!(cache.cached_partitions().await, 0);
        // Requested depths survive so subscribers keep their K
        assert_eq!(cache.depth_for(&na_solo()).await, 50);
    }

    #[tokio::test]
    async fn test_depth_only_grows() {
        let cache = LeaderboardCache::new(10);
        assert_eq!(cache.depth_for(&na_solo()).await, 10);
        assert_eq!(cache.request_depth(&na_solo(), 5).await, 10);
        assert_eq!(cache.request_depth(&na_solo(), 25).await, 25);
        assert_eq!(cache.request_depth(&na_solo(), 15).await, 25);
        assert_eq!(cache.depth_for(&PartitionKey::Global).await, 10);
    }

    #[tokio::test]
    async fn test_sweep_task_clears_and_stops() {
        let cache = Arc::new(LeaderboardCache::new(10));
        let token = CancellationToken::new();
        cache.put(snapshot(na_solo(), Utc::now())).await;

        cache.clone().spawn_sweep_task(Duration::from_millis(20), token.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get(&na_solo()).await.is_none());

        token.cancel();
    }
}
