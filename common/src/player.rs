use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::partition::{GameMode, PartitionKey, Region};

/// Identity of a score record. A player holds one independent score per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerKey {
    pub player_id: String,
    pub region: Region,
    pub game_mode: GameMode,
}

impl PlayerKey {
    pub fn new(player_id: impl Into<String>, region: Region, game_mode: GameMode) -> Self {
        Self {
            player_id: player_id.into(),
            region,
            game_mode,
        }
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey::scoped(self.region, self.game_mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub player_id: String,
    pub name: String,
    pub region: Region,
    pub game_mode: GameMode,
    /// Never negative; updates that would go below zero clamp to zero.
    pub daily_score: i64,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PlayerRecord {
    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.player_id.clone(), self.region, self.game_mode)
    }
}

/// Apply a delta to a score with the zero floor.
pub fn clamp_score(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}

/// Leaderboard order: score descending, then player id ascending. Region and
/// game mode codes break the remaining ties on the global board, compared as
/// text to match the database ordering.
pub fn rank_order(a: &PlayerRecord, b: &PlayerRecord) -> Ordering {
    b.daily_score
        .cmp(&a.daily_score)
        .then_with(|| a.player_id.cmp(&b.player_id))
        .then_with(|| a.region.as_str().cmp(b.region.as_str()))
        .then_with(|| a.game_mode.as_str().cmp(b.game_mode.as_str()))
}
