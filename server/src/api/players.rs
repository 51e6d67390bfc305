use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use common::{LeaderboardEntry, PartitionFilter, PartitionKey, PlayerKey, PlayerRecord};

use crate::db::with_store_timeout;
use crate::error::{LeaderboardError, Result, parse_game_mode, parse_partition, parse_region, validate_limit};
use crate::http_server::HttpServerState;
use crate::update_processor::ScoreUpdate;

const DEFAULT_GLOBAL_LIMIT: usize = 50;
const DEFAULT_LIST_LIMIT: usize = 20;

/// Body of `POST /api/players/score`. Every field is optional so missing ones
/// can be reported together.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub player_id: Option<String>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub game_mode: Option<String>,
    pub score_delta: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionQuery {
    pub region: Option<String>,
    pub game_mode: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse<T> {
    pub status: &'static str,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub status: &'static str,
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ItemResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self { status: "success", data })
    }
}

impl<T> ListResponse<T> {
    fn success(data: Vec<T>) -> Json<Self> {
        Json(Self {
            status: "success",
            count: data.len(),
            data,
        })
    }
}

/// Parse an optional `limit` query value, falling back to `default`.
pub fn parse_limit(raw: Option<&str>, default: usize) -> Result<usize> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| LeaderboardError::validation("Limit must be a number between 1 and 100"))
            .and_then(validate_limit),
    }
}

fn required_partition(region: Option<&str>, game_mode: Option<&str>) -> Result<PartitionKey> {
    match (region, game_mode) {
        (Some(region), Some(game_mode)) => parse_partition(region, game_mode),
        _ => Err(LeaderboardError::validation(
            "Missing required query parameters: region, gameMode",
        )),
    }
}

/// Apply a score delta through the same path as socket updates.
pub async fn update_score(
    State(state): State<HttpServerState>,
    body: std::result::Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<ItemResponse<PlayerRecord>>> {
    let Json(body) = body.map_err(|rejection| {
        debug!("Rejected score body: {}", rejection.body_text());
        LeaderboardError::validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;
    let (Some(player_id), Some(name), Some(region), Some(game_mode), Some(score_delta)) =
        (body.player_id, body.name, body.region, body.game_mode, body.score_delta)
    else {
        return Err(LeaderboardError::validation(
            "Missing required fields: playerId, name, region, gameMode, scoreDelta",
        ));
    };
    let Some(score_delta) = score_delta.as_i64() else {
        return Err(LeaderboardError::validation("scoreDelta must be an integer"));
    };

    let outcome = state
        .processor
        .apply_delta(ScoreUpdate {
            player_id,
            name,
            region,
            game_mode,
            score_delta,
        })
        .await?;
    Ok(ItemResponse::success(outcome.record))
}

/// Top players of one region and game mode.
pub async fn get_leaderboard(
    State(state): State<HttpServerState>,
    Query(query): Query<PartitionQuery>,
) -> Result<Json<ListResponse<LeaderboardEntry>>> {
    let partition = required_partition(query.region.as_deref(), query.game_mode.as_deref())?;
    let limit = parse_limit(query.limit.as_deref(), state.default_top_k)?;

    let snapshot = state.refresher.read(partition, limit).await?;
    Ok(ListResponse::success(snapshot.top(limit)))
}

/// Top players across every region and game mode.
pub async fn get_global_leaderboard(
    State(state): State<HttpServerState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListResponse<LeaderboardEntry>>> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_GLOBAL_LIMIT)?;

    let snapshot = state.refresher.read(PartitionKey::Global, limit).await?;
    Ok(ListResponse::success(snapshot.top(limit)))
}

pub async fn get_recent_updates(
    State(state): State<HttpServerState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListResponse<PlayerRecord>>> {
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_LIST_LIMIT)?;

    let records = with_store_timeout(state.store_timeout, state.store.recent(limit)).await?;
    Ok(ListResponse::success(records))
}

pub async fn get_leaderboard_by_region(
    State(state): State<HttpServerState>,
    Path(region): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListResponse<PlayerRecord>>> {
    let filter = PartitionFilter {
        region: Some(parse_region(&region)?),
        game_mode: None,
    };
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_LIST_LIMIT)?;

    let records = with_store_timeout(state.store_timeout, state.store.top_k(filter, limit)).await?;
    Ok(ListResponse::success(records))
}

pub async fn get_leaderboard_by_game_mode(
    State(state): State<HttpServerState>,
    Path(game_mode): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListResponse<PlayerRecord>>> {
    let filter = PartitionFilter {
        region: None,
        game_mode: Some(parse_game_mode(&game_mode)?),
    };
    let limit = parse_limit(query.limit.as_deref(), DEFAULT_LIST_LIMIT)?;

    let records = with_store_timeout(state.store_timeout, state.store.top_k(filter, limit)).await?;
    Ok(ListResponse::success(records))
}

/// One player's record in one partition.
pub async fn get_player(
    State(state): State<HttpServerState>,
    Path(player_id): Path<String>,
    Query(query): Query<PartitionQuery>,
) -> Result<Json<ItemResponse<PlayerRecord>>> {
    let partition = required_partition(query.region.as_deref(), query.game_mode.as_deref())?;
    let (Some(region), Some(game_mode)) = (partition.region(), partition.game_mode()) else {
        return Err(LeaderboardError::validation("Missing required query parameters: region, gameMode"));
    };

    let key = PlayerKey::new(player_id, region, game_mode);
    match with_store_timeout(state.store_timeout, state.store.find_one(&key)).await? {
        Some(record) => Ok(ItemResponse::success(record)),
        None => {
            debug!("Player {} not found in {}", key.player_id, partition);
            Err(LeaderboardError::NotFound("Player not found".to_string()))
        }
    }
}
