use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::partition::{GameMode, Region};
use crate::snapshot::{LeaderboardEntry, LeaderboardSnapshot};

/// Messages a client sends over the socket.
///
/// Region and game mode stay raw strings here so that bad values surface as a
/// validation error frame rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        region: String,
        game_mode: String,
        limit: Option<usize>,
    },
    SubscribeGlobal {
        limit: Option<usize>,
    },
    Unsubscribe {
        region: String,
        game_mode: String,
    },
    UnsubscribeGlobal,
    UpdateScore {
        player_id: String,
        name: String,
        region: String,
        game_mode: String,
        score_delta: i64,
    },
    Ping {
        client_time: i64,
    },
}

/// The delta that caused a leaderboard refresh. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreTrigger {
    pub player_id: String,
    pub region: Region,
    pub game_mode: GameMode,
    pub score_delta: i64,
}

/// Messages the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    LeaderboardUpdate {
        /// `None` for the global leaderboard.
        region: Option<Region>,
        game_mode: Option<GameMode>,
        players: Vec<LeaderboardEntry>,
        timestamp: DateTime<Utc>,
        trigger: Option<ScoreTrigger>,
    },
    ScoreUpdate {
        player_id: String,
        name: String,
        region: String,
        game_mode: String,
        score_delta: i64,
        success: bool,
        daily_score: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Pong {
        client_time: i64,
        server_time: i64,
    },
    Shutdown,
}

impl ServerMessage {
    /// Leaderboard frame carrying the first `k` entries of `snapshot`.
    pub fn leaderboard_update(
        snapshot: &LeaderboardSnapshot,
        k: usize,
        trigger: Option<ScoreTrigger>,
    ) -> Self {
        ServerMessage::LeaderboardUpdate {
            region: snapshot.partition.region(),
            game_mode: snapshot.partition.game_mode(),
            players: snapshot.top(k),
            timestamp: snapshot.generated_at,
            trigger,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_score_wire_format() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "updateScore": {
                "playerId": "p1",
                "name": "Alice",
                "region": "na",
                "gameMode": "Solo",
                "scoreDelta": -5
            }
        }))
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::UpdateScore {
                player_id: "p1".to_string(),
                name: "Alice".to_string(),
                region: "na".to_string(),
                game_mode: "Solo".to_string(),
                score_delta: -5,
            }
        );
    }

    #[test]
    fn test_subscribe_limit_is_optional() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"subscribe": {"region": "EU", "gameMode": "duo"}})).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { limit: None, .. }));
    }

    #[test]
    fn test_error_frame() {
        let json = serde_json::to_value(ServerMessage::error("boom")).unwrap();
        assert_eq!(json, json!({"error": {"message": "boom"}}));
    }
}
