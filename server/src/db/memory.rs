use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

use common::{PartitionFilter, PlayerKey, PlayerRecord, clamp_score, rank_order};

use super::ScoreStore;

/// In-process store for development and tests.
///
/// The write lock is held across the whole read-modify-write of an upsert, so
/// concurrent deltas to one key never lose updates.
#[derive(Clone, Default)]
pub struct MemoryScoreStore {
    records: Arc<RwLock<HashMap<PlayerKey, PlayerRecord>>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn upsert_increment(&self, key: &PlayerKey, delta: i64, name: &str) -> Result<PlayerRecord> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        let record = records
            .entry(key.clone())
            .and_modify(|record| {
                record.daily_score = clamp_score(record.daily_score, delta);
                record.name = name.to_string();
                record.last_updated = now;
            })
            .or_insert_with(|| PlayerRecord {
                player_id: key.player_id.clone(),
                name: name.to_string(),
                region: key.region,
                game_mode: key.game_mode,
                daily_score: clamp_score(0, delta),
                last_updated: now,
                created_at: now,
            });

        trace!("Upserted {:?} to score {}", key, record.daily_score);
        Ok(record.clone())
    }

    async fn top_k(&self, filter: PartitionFilter, k: usize) -> Result<Vec<PlayerRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<PlayerRecord> = records
            .values()
            .filter(|record| filter.matches(record.region, record.game_mode))
            .cloned()
            .collect();
        matching.sort_by(rank_order);
        matching.truncate(k);
        Ok(matching)
    }

    async fn find_one(&self, key: &PlayerKey) -> Result<Option<PlayerRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<PlayerRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        all.truncate(limit);
        Ok(all)
    }
}
