use anyhow::Result;
use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    http::HeaderValue,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{health, players};
use crate::broadcast::BroadcastCoordinator;
use crate::db::ScoreStore;
use crate::refresher::PartitionRefresher;
use crate::subscription_registry::SubscriptionRegistry;
use crate::transport::ConnectionHub;
use crate::update_processor::UpdateProcessor;
use crate::ws_server::{WsContext, handle_websocket};

/// Combined HTTP server state containing both API and WebSocket dependencies
#[derive(Clone)]
pub struct HttpServerState {
    pub store: Arc<dyn ScoreStore>,
    pub refresher: Arc<PartitionRefresher>,
    pub processor: Arc<UpdateProcessor>,
    pub registry: Arc<SubscriptionRegistry>,
    pub coordinator: Arc<BroadcastCoordinator>,
    pub hub: Arc<ConnectionHub>,
    pub store_timeout: Duration,
    pub default_top_k: usize,
    /// Cancellation token for graceful shutdown
    pub cancellation_token: CancellationToken,
}

/// Build the router with the query API, health checks and the socket endpoint.
pub fn build_router(state: HttpServerState, cors_origins: &[String]) -> Router {
    let player_routes = Router::new()
        .route("/score", post(players::update_score))
        .route("/leaderboard", get(players::get_leaderboard))
        .route("/global", get(players::get_global_leaderboard))
        .route("/recent", get(players::get_recent_updates))
        .route("/region/:region", get(players::get_leaderboard_by_region))
        .route("/gamemode/:game_mode", get(players::get_leaderboard_by_game_mode))
        .route("/:player_id", get(players::get_player));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::health_check_json))
        .route("/ws", get(websocket_handler))
        .nest("/api/players", player_routes)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {}: {}", origin, e);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Serve on `listener` until the state's cancellation token fires.
pub async fn run_http_server(listener: TcpListener, state: HttpServerState, cors_origins: Vec<String>) -> Result<()> {
    let cancellation_token = state.cancellation_token.clone();
    let app = build_router(state, &cors_origins);

    info!("HTTP server (API + WebSocket) listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
            info!("HTTP server received shutdown signal");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
}

/// WebSocket upgrade handler
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<HttpServerState>) -> impl IntoResponse {
    let ctx = WsContext {
        processor: state.processor,
        registry: state.registry,
        coordinator: state.coordinator,
        cancellation_token: state.cancellation_token,
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, ctx))
}
