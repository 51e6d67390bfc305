use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use common::{GameMode, PartitionKey, Region};

/// Failures surfaced by the leaderboard core.
#[derive(Debug, Error)]
pub enum LeaderboardError {
    /// Bad region, game mode, limit or a missing field. Always the caller's fault.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    /// Store timed out or failed. Transient, the caller may retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Sending to one connection failed. Never aborts an update.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, LeaderboardError>;

impl LeaderboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        LeaderboardError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LeaderboardError::Validation(_) => StatusCode::BAD_REQUEST,
            LeaderboardError::NotFound(_) => StatusCode::NOT_FOUND,
            LeaderboardError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LeaderboardError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LeaderboardError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({
                "status": "error",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

/// Check a requested limit against `1..=MAX_LIMIT`.
pub fn validate_limit(limit: usize) -> Result<usize> {
    if (1..=common::MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(LeaderboardError::validation(format!(
            "Limit must be a number between 1 and {}",
            common::MAX_LIMIT
        )))
    }
}

pub fn parse_region(region: &str) -> Result<Region> {
    region
        .parse()
        .map_err(|e: anyhow::Error| LeaderboardError::validation(e.to_string()))
}

pub fn parse_game_mode(game_mode: &str) -> Result<GameMode> {
    game_mode
        .parse()
        .map_err(|e: anyhow::Error| LeaderboardError::validation(e.to_string()))
}

pub fn parse_partition(region: &str, game_mode: &str) -> Result<PartitionKey> {
    Ok(PartitionKey::scoped(parse_region(region)?, parse_game_mode(game_mode)?))
}
