use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use common::{LeaderboardSnapshot, PartitionKey, PlayerKey, PlayerRecord, ScoreTrigger};

use crate::db::with_store_timeout;
use crate::error::{LeaderboardError, Result, parse_game_mode, parse_region};
use crate::refresher::PartitionRefresher;

/// Receives every snapshot a score update caused to be recomputed and cached.
#[async_trait]
pub trait SnapshotListener: Send + Sync {
    async fn on_refresh(&self, snapshot: Arc<LeaderboardSnapshot>, trigger: Option<ScoreTrigger>);
}

/// Raw score update as received from a client.
#[derive(Debug, Clone)]
pub struct ScoreUpdate {
    pub player_id: String,
    pub name: String,
    pub region: String,
    pub game_mode: String,
    pub score_delta: i64,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub record: PlayerRecord,
    /// Partitions whose snapshot was recomputed because of this update.
    pub refreshed: Vec<PartitionKey>,
}

/// Whether a cached snapshot may no longer match the ranking after `record` changed.
///
/// Refresh when nothing is cached, when the snapshot is not full, when the new
/// score reaches the cutoff, or when the player is already on the board.
pub fn needs_refresh(cached: Option<&LeaderboardSnapshot>, record: &PlayerRecord) -> bool {
    let Some(snapshot) = cached else {
        return true;
    };
    if !snapshot.is_full() {
        return true;
    }
    if snapshot.cutoff_score().is_none_or(|cutoff| record.daily_score >= cutoff) {
        return true;
    }
    snapshot.contains(&record.key())
}

/// Validate raw client input into a record key.
pub fn validate_key(player_id: &str, region: &str, game_mode: &str) -> Result<PlayerKey> {
    let player_id = player_id.trim();
    if player_id.is_empty() {
        return Err(LeaderboardError::validation("Missing required field: playerId"));
    }
    Ok(PlayerKey::new(player_id, parse_region(region)?, parse_game_mode(game_mode)?))
}

/// Applies score deltas and keeps the affected cached leaderboards current.
pub struct UpdateProcessor {
    refresher: Arc<PartitionRefresher>,
    listener: Arc<dyn SnapshotListener>,
}

impl UpdateProcessor {
    pub fn new(refresher: Arc<PartitionRefresher>, listener: Arc<dyn SnapshotListener>) -> Self {
        Self { refresher, listener }
    }

    /// Persist the delta, then refresh and announce every partition the
    /// admission policy flags. The returned record is the durable result;
    /// refresh or broadcast trouble never turns it into an error.
    pub async fn apply_delta(&self, update: ScoreUpdate) -> Result<UpdateOutcome> {
        let key = validate_key(&update.player_id, &update.region, &update.game_mode)?;
        let name = update.name.trim();
        if name.is_empty() {
            return Err(LeaderboardError::validation("Missing required field: name"));
        }

        let record = with_store_timeout(
            self.refresher.store_timeout(),
            self.refresher.store().upsert_increment(&key, update.score_delta, name),
        )
        .await?;
        info!(
            "Score update {} {} {:+} -> {}",
            key.player_id,
            key.partition(),
            update.score_delta,
            record.daily_score
        );

        let trigger = ScoreTrigger {
            player_id: key.player_id.clone(),
            region: key.region,
            game_mode: key.game_mode,
            score_delta: update.score_delta,
        };

        let mut refreshed = Vec::new();
        for partition in [key.partition(), PartitionKey::Global] {
            if self.refresh_if_needed(partition, &record, &trigger).await {
                refreshed.push(partition);
            }
        }

        Ok(UpdateOutcome { record, refreshed })
    }

    async fn refresh_if_needed(&self, partition: PartitionKey, record: &PlayerRecord, trigger: &ScoreTrigger) -> bool {
        let admitted = self
            .refresher
            .refresh_if(partition, |cached| needs_refresh(cached, record))
            .await;

        match admitted {
            Ok(None) => {
                debug!("Update to {} does not affect {}", record.player_id, partition);
                false
            }
            Ok(Some(refreshed)) => {
                if refreshed.applied {
                    self.listener
                        .on_refresh(refreshed.snapshot, Some(trigger.clone()))
                        .await;
                }
                true
            }
            Err(e) => {
                // The write is durable; make sure nobody keeps reading the old ranking
                warn!("Failed to refresh {} after update: {}", partition, e);
                self.refresher.cache().invalidate(&partition).await;
                false
            }
        }
    }
}
