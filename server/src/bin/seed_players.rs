use anyhow::{Context, Result, bail};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{GameMode, PlayerKey, Region};
use server::config::ServerConfig;
use server::db::{PostgresScoreStore, ScoreStore};

const DEFAULT_PLAYER_COUNT: usize = 1000;
const MAX_SEED_SCORE: i64 = 10_000;

/// Fill the configured database with random players.
///
/// Usage: `seed_players [count]`
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let count = match std::env::args().nth(1) {
        Some(raw) => raw.parse::<usize>().with_context(|| format!("Invalid player count: {}", raw))?,
        None => DEFAULT_PLAYER_COUNT,
    };

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let Some(database) = config.database else {
        bail!("LEADERBOARD_DB_HOST must be set to seed players");
    };
    let store = PostgresScoreStore::connect(&database).await?;

    let mut rng = rand::thread_rng();
    for i in 0..count {
        let region = *Region::ALL.choose(&mut rng).context("no regions")?;
        let game_mode = *GameMode::ALL.choose(&mut rng).context("no game modes")?;
        let key = PlayerKey::new(format!("player_{}", i + 1), region, game_mode);
        let score = rng.gen_range(0..MAX_SEED_SCORE);

        store
            .upsert_increment(&key, score, &format!("Player{}", i + 1))
            .await
            .with_context(|| format!("Failed to seed {}", key.player_id))?;
    }

    info!("Seeded {} players", count);
    Ok(())
}
