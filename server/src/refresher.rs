use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use common::{LeaderboardSnapshot, PartitionKey};

use crate::db::{ScoreStore, with_store_timeout};
use crate::error::Result;
use crate::leaderboard_cache::LeaderboardCache;

/// Result of recomputing one partition.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub snapshot: Arc<LeaderboardSnapshot>,
    /// False when a newer snapshot was already cached and this one was dropped.
    pub applied: bool,
}

/// Recomputes partition snapshots from the store and installs them in the cache.
///
/// Refreshes of the same partition run one at a time; different partitions
/// never wait on each other.
pub struct PartitionRefresher {
    store: Arc<dyn ScoreStore>,
    cache: Arc<LeaderboardCache>,
    locks: Mutex<HashMap<PartitionKey, Arc<Mutex<()>>>>,
    store_timeout: Duration,
}

impl PartitionRefresher {
    pub fn new(store: Arc<dyn ScoreStore>, cache: Arc<LeaderboardCache>, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            locks: Mutex::new(HashMap::new()),
            store_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<LeaderboardCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ScoreStore> {
        &self.store
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    async fn partition_lock(&self, partition: PartitionKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(partition).or_default().clone()
    }

    /// Query the store for the partition's top rows and cache the result.
    pub async fn refresh(&self, partition: PartitionKey) -> Result<Refreshed> {
        let lock = self.partition_lock(partition).await;
        let _guard = lock.lock().await;
        self.refresh_locked(partition).await
    }

    /// Refresh only when `admit` accepts the cached snapshot. The check runs
    /// under the partition lock, after any refresh already in flight has
    /// landed, so it always judges the snapshot that would otherwise stay.
    /// Returns `None` when `admit` declined.
    pub async fn refresh_if<F>(&self, partition: PartitionKey, admit: F) -> Result<Option<Refreshed>>
    where
        F: FnOnce(Option<&LeaderboardSnapshot>) -> bool,
    {
        let lock = self.partition_lock(partition).await;
        let _guard = lock.lock().await;

        let cached = self.cache.get(&partition).await;
        if !admit(cached.as_deref()) {
            return Ok(None);
        }
        self.refresh_locked(partition).await.map(Some)
    }

    async fn refresh_locked(&self, partition: PartitionKey) -> Result<Refreshed> {
        let depth = self.cache.depth_for(&partition).await;
        let generated_at = Utc::now();
        let records = with_store_timeout(self.store_timeout, self.store.top_k(partition.into(), depth)).await?;

        let snapshot = Arc::new(LeaderboardSnapshot::from_ranked(partition, records, depth, generated_at));
        let applied = self.cache.put(snapshot.clone()).await;
        debug!(
            "Refreshed {} ({} of {} rows, applied: {})",
            partition,
            snapshot.players.len(),
            depth,
            applied
        );

        Ok(Refreshed { snapshot, applied })
    }

    /// Snapshot for a one-off query of `k` rows. Served from the cache when
    /// the subscribed depth covers `k`; deeper queries go straight to the
    /// store without growing the depth later refreshes compute.
    pub async fn read(&self, partition: PartitionKey, k: usize) -> Result<Arc<LeaderboardSnapshot>> {
        if k <= self.cache.depth_for(&partition).await {
            return self.snapshot(partition, k).await;
        }

        let generated_at = Utc::now();
        let records = with_store_timeout(self.store_timeout, self.store.top_k(partition.into(), k)).await?;
        Ok(Arc::new(LeaderboardSnapshot::from_ranked(partition, records, k, generated_at)))
    }

    /// Best snapshot for a reader that wants `k` rows: the cached one if it is
    /// deep enough, otherwise a fresh one.
    pub async fn snapshot(&self, partition: PartitionKey, k: usize) -> Result<Arc<LeaderboardSnapshot>> {
        self.cache.request_depth(&partition, k).await;

        if let Some(cached) = self.cache.get(&partition).await {
            if cached.depth >= k {
                return Ok(cached);
            }
        }

        let refreshed = self.refresh(partition).await?;
        if refreshed.applied {
            return Ok(refreshed.snapshot);
        }
        // Someone cached a newer snapshot meanwhile
        Ok(self.cache.get(&partition).await.unwrap_or(refreshed.snapshot))
    }
}
