use axum::{Json, extract::State};
use serde::Serialize;

use crate::http_server::HttpServerState;

/// Instance status with live connection and subscription counts
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub subscriptions: usize,
}

/// Plain liveness check
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn health_check_json(State(state): State<HttpServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.hub.connection_count().await,
        subscriptions: state.registry.subscription_count().await,
    })
}
