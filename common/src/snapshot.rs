use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::partition::{GameMode, PartitionKey, Region};
use crate::player::{PlayerKey, PlayerRecord};

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player_id: String,
    pub name: String,
    pub region: Region,
    pub game_mode: GameMode,
    pub daily_score: i64,
    pub last_updated: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn is_key(&self, key: &PlayerKey) -> bool {
        self.player_id == key.player_id && self.region == key.region && self.game_mode == key.game_mode
    }
}

/// Immutable top-K result for a partition at a point in time.
///
/// `players` is ordered by score descending and holds at most `depth` entries.
/// `generated_at` is taken before the store was read, so a snapshot reflects
/// a store state at least as new as its timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    pub partition: PartitionKey,
    pub players: Vec<LeaderboardEntry>,
    pub depth: usize,
    pub generated_at: DateTime<Utc>,
}

impl LeaderboardSnapshot {
    /// Build a snapshot from records already in rank order.
    pub fn from_ranked(
        partition: PartitionKey,
        records: Vec<PlayerRecord>,
        depth: usize,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let players = records
            .into_iter()
            .take(depth)
            .enumerate()
            .map(|(idx, record)| LeaderboardEntry {
                rank: idx + 1,
                player_id: record.player_id,
                name: record.name,
                region: record.region,
                game_mode: record.game_mode,
                daily_score: record.daily_score,
                last_updated: record.last_updated,
            })
            .collect();

        Self {
            partition,
            players,
            depth,
            generated_at,
        }
    }

    /// True when the snapshot holds `depth` entries.
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.depth
    }

    /// Score of the last entry, if any.
    pub fn cutoff_score(&self) -> Option<i64> {
        self.players.last().map(|entry| entry.daily_score)
    }

    pub fn contains(&self, key: &PlayerKey) -> bool {
        self.players.iter().any(|entry| entry.is_key(key))
    }

    /// First `k` entries.
    pub fn top(&self, k: usize) -> Vec<LeaderboardEntry> {
        self.players.iter().take(k).cloned().collect()
    }
}
