use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use common::{GameMode, PlayerRecord, Region};

/// Row of the `players` table
#[derive(Debug, Clone, FromRow)]
pub struct PlayerRow {
    pub player_id: String,
    pub name: String,
    pub region: String,
    pub game_mode: String,
    pub daily_score: i64,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PlayerRow> for PlayerRecord {
    type Error = anyhow::Error;

    fn try_from(row: PlayerRow) -> Result<Self> {
        let region: Region = row
            .region
            .parse()
            .with_context(|| format!("Corrupt region for player {}", row.player_id))?;
        let game_mode: GameMode = row
            .game_mode
            .parse()
            .with_context(|| format!("Corrupt game mode for player {}", row.player_id))?;

        Ok(PlayerRecord {
            player_id: row.player_id,
            name: row.name,
            region,
            game_mode,
            daily_score: row.daily_score,
            last_updated: row.last_updated,
            created_at: row.created_at,
        })
    }
}

pub fn rows_to_records(rows: Vec<PlayerRow>) -> Result<Vec<PlayerRecord>> {
    rows.into_iter().map(PlayerRecord::try_from).collect()
}
