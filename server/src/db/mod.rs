pub mod memory;
pub mod models;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use common::{PartitionFilter, PlayerKey, PlayerRecord};

use crate::error::LeaderboardError;

pub use memory::MemoryScoreStore;
pub use postgres::PostgresScoreStore;

/// Durable per-player score records.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Add `delta` to the record at `key` (creating it if absent), set its name
    /// and `last_updated`, and return the result. The score never drops below
    /// zero. Must be a single atomic operation per key.
    async fn upsert_increment(&self, key: &PlayerKey, delta: i64, name: &str) -> Result<PlayerRecord>;

    /// Highest `k` records matching `filter`, in leaderboard order.
    async fn top_k(&self, filter: PartitionFilter, k: usize) -> Result<Vec<PlayerRecord>>;

    async fn find_one(&self, key: &PlayerKey) -> Result<Option<PlayerRecord>>;

    /// Most recently updated records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<PlayerRecord>>;
}

/// Await a store call, bounded by `timeout`. Failures and timeouts become
/// [`LeaderboardError::StoreUnavailable`].
pub async fn with_store_timeout<T, F>(timeout: Duration, call: F) -> crate::error::Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!("Store call failed: {:#}", e);
            Err(LeaderboardError::StoreUnavailable(format!("{:#}", e)))
        }
        Err(_) => {
            warn!("Store call timed out after {:?}", timeout);
            Err(LeaderboardError::StoreUnavailable(format!(
                "timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}
