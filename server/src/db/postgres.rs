use anyhow::{Context, Result};
use async_trait::async_trait;
use refinery::config::{Config, ConfigDbType};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use common::{PartitionFilter, PlayerKey, PlayerRecord};

use super::ScoreStore;
use super::models::{PlayerRow, rows_to_records};
use crate::config::DatabaseConfig;

mod migrations {
    use refinery::embed_migrations;
    embed_migrations!("./migrations");
}

const PLAYER_COLUMNS: &str = "player_id, name, region, game_mode, daily_score, last_updated, created_at";

/// Postgres-backed store. The increment runs as one `INSERT .. ON CONFLICT`
/// statement so concurrent deltas to the same key serialize on the row lock.
#[derive(Clone)]
pub struct PostgresScoreStore {
    pool: PgPool,
}

impl PostgresScoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations and open a pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut db_config = Config::new(ConfigDbType::Postgres)
            .set_db_host(&config.host)
            .set_db_port(&config.port)
            .set_db_user(&config.user)
            .set_db_pass(&config.pass)
            .set_db_name(&config.name);

        migrations::migrations::runner()
            .run_async(&mut db_config)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ScoreStore for PostgresScoreStore {
    async fn upsert_increment(&self, key: &PlayerKey, delta: i64, name: &str) -> Result<PlayerRecord> {
        let query = format!(
            r#"
            INSERT INTO players ({cols})
            VALUES ($1, $2, $3, $4, GREATEST($5::BIGINT, 0), NOW(), NOW())
            ON CONFLICT (player_id, region, game_mode) DO UPDATE
            SET daily_score = GREATEST(players.daily_score + $5::BIGINT, 0),
                name = EXCLUDED.name,
                last_updated = EXCLUDED.last_updated
            RETURNING {cols}
            "#,
            cols = PLAYER_COLUMNS
        );

        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(&key.player_id)
            .bind(name)
            .bind(key.region.as_str())
            .bind(key.game_mode.as_str())
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .context("Failed to upsert player score")?;

        PlayerRecord::try_from(row)
    }

    async fn top_k(&self, filter: PartitionFilter, k: usize) -> Result<Vec<PlayerRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM players
            WHERE ($1::TEXT IS NULL OR region = $1)
              AND ($2::TEXT IS NULL OR game_mode = $2)
            ORDER BY daily_score DESC, player_id COLLATE "C" ASC, region ASC, game_mode ASC
            LIMIT $3
            "#,
            cols = PLAYER_COLUMNS
        );

        let rows = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(filter.region.map(|r| r.as_str()))
            .bind(filter.game_mode.map(|m| m.as_str()))
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query leaderboard")?;

        rows_to_records(rows)
    }

    async fn find_one(&self, key: &PlayerKey) -> Result<Option<PlayerRecord>> {
        let query = format!(
            "SELECT {} FROM players WHERE player_id = $1 AND region = $2 AND game_mode = $3",
            PLAYER_COLUMNS
        );

        let row = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(&key.player_id)
            .bind(key.region.as_str())
            .bind(key.game_mode.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch player")?;

        row.map(PlayerRecord::try_from).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PlayerRecord>> {
        let query = format!(
            r#"SELECT {} FROM players ORDER BY last_updated DESC, player_id COLLATE "C" ASC LIMIT $1"#,
            PLAYER_COLUMNS
        );

        let rows = sqlx::query_as::<_, PlayerRow>(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recent updates")?;

        rows_to_records(rows)
    }
}
