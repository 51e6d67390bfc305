use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{ClientMessage, PartitionKey, ServerMessage};

use crate::broadcast::BroadcastCoordinator;
use crate::error::{LeaderboardError, parse_partition};
use crate::subscription_registry::SubscriptionRegistry;
use crate::update_processor::{ScoreUpdate, UpdateProcessor};

/// Outbound frames a connection may have queued before sends to it start failing.
const MAILBOX_SIZE: usize = 256;

/// How long a client gets to close after the shutdown frame.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a socket handler needs.
#[derive(Clone)]
pub struct WsContext {
    pub processor: Arc<UpdateProcessor>,
    pub registry: Arc<SubscriptionRegistry>,
    /// Subscriptions go through the coordinator so the initial frame is ordered with broadcasts
    pub coordinator: Arc<BroadcastCoordinator>,
    pub cancellation_token: CancellationToken,
}

/// Handle WebSocket connection from Axum
pub async fn handle_websocket(socket: WebSocket, ctx: WsContext) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!("New WebSocket connection {}", connection_id);

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Every frame for this client goes through its mailbox
    let (ws_tx, mut ws_rx) = mpsc::channel::<ServerMessage>(MAILBOX_SIZE);
    let transport = ctx.registry.transport().clone();
    transport.register(&connection_id, ws_tx.clone()).await;

    // Spawn task to forward messages from channel to WebSocket
    let forward_id = connection_id.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message for {}: {}", forward_id, e);
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(json)).await {
                debug!("Failed to send message to WebSocket {}: {}", forward_id, e);
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let shutdown_timeout = tokio::time::sleep(Duration::from_secs(u64::MAX / 4));
    tokio::pin!(shutdown_timeout);
    let mut shutdown_started = false;

    loop {
        tokio::select! {
            _ = &mut shutdown_timeout, if shutdown_started => {
                warn!("Shutdown timeout reached, closing connection {}", connection_id);
                break;
            }
            _ = ctx.cancellation_token.cancelled(), if !shutdown_started => {
                info!("Sending shutdown message to {}", connection_id);
                if ws_tx.send(ServerMessage::Shutdown).await.is_err() {
                    break;
                }
                shutdown_timeout.as_mut().reset(tokio::time::Instant::now() + SHUTDOWN_GRACE);
                shutdown_started = true;
            }
            next = ws_stream.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => {
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => process_ws_message(&ctx, &connection_id, msg).await,
                            Err(e) => {
                                debug!("Undecodable message from {}: {}", connection_id, e);
                                vec![ServerMessage::error(format!("Invalid message: {}", e))]
                            }
                        };
                        for reply in replies {
                            if ws_tx.send(reply).await.is_err() {
                                warn!("WebSocket channel closed, dropping reply to {}", connection_id);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} closed the connection", connection_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", connection_id, e);
                        break;
                    }
                }
            }
        }
    }

    ctx.registry.unsubscribe_all(&connection_id).await;
    transport.unregister(&connection_id).await;
    drop(ws_tx);
    // Flush whatever is still queued, then let the sink close
    if tokio::time::timeout(Duration::from_secs(1), forward_task).await.is_err() {
        debug!("Forward task for {} did not finish in time", connection_id);
    }
    info!("WebSocket connection {} closed", connection_id);
}

/// Apply one client message and return the frames to send back to that client.
pub async fn process_ws_message(ctx: &WsContext, connection_id: &str, msg: ClientMessage) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Subscribe { region, game_mode, limit } => {
            let result = match parse_partition(&region, &game_mode) {
                Ok(partition) => ctx.coordinator.subscribe(connection_id, partition, limit).await,
                Err(e) => Err(e),
            };
            match result {
                // The initial frame is already queued on the connection
                Ok(_) => vec![],
                Err(e) => vec![error_frame(&e)],
            }
        }
        ClientMessage::SubscribeGlobal { limit } => {
            match ctx.coordinator.subscribe(connection_id, PartitionKey::Global, limit).await {
                Ok(_) => vec![],
                Err(e) => vec![error_frame(&e)],
            }
        }
        ClientMessage::Unsubscribe { region, game_mode } => match parse_partition(&region, &game_mode) {
            Ok(partition) => {
                ctx.registry.unsubscribe(connection_id, partition).await;
                vec![]
            }
            Err(e) => vec![error_frame(&e)],
        },
        ClientMessage::UnsubscribeGlobal => {
            ctx.registry.unsubscribe(connection_id, PartitionKey::Global).await;
            vec![]
        }
        ClientMessage::UpdateScore {
            player_id,
            name,
            region,
            game_mode,
            score_delta,
        } => {
            let update = ScoreUpdate {
                player_id: player_id.clone(),
                name: name.clone(),
                region: region.clone(),
                game_mode: game_mode.clone(),
                score_delta,
            };
            match ctx.processor.apply_delta(update).await {
                Ok(outcome) => vec![ServerMessage::ScoreUpdate {
                    player_id: outcome.record.player_id,
                    name: outcome.record.name,
                    region: outcome.record.region.to_string(),
                    game_mode: outcome.record.game_mode.to_string(),
                    score_delta,
                    success: true,
                    daily_score: Some(outcome.record.daily_score),
                    timestamp: outcome.record.last_updated,
                }],
                Err(e) => vec![
                    ServerMessage::ScoreUpdate {
                        player_id,
                        name,
                        region,
                        game_mode,
                        score_delta,
                        success: false,
                        daily_score: None,
                        timestamp: Utc::now(),
                    },
                    error_frame(&e),
                ],
            }
        }
        ClientMessage::Ping { client_time } => vec![ServerMessage::Pong {
            client_time,
            server_time: Utc::now().timestamp_millis(),
        }],
    }
}

fn error_frame(e: &LeaderboardError) -> ServerMessage {
    if !matches!(e, LeaderboardError::Validation(_)) {
        warn!("Request failed: {}", e);
    }
    ServerMessage::error(e.to_string())
}
