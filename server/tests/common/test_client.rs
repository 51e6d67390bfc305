#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use common::{ClientMessage, LeaderboardEntry, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Test client wrapper for easier testing
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TokioTcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(addr).await?;
        Ok(TestClient { ws: ws_stream })
    }

    pub async fn subscribe(&mut self, region: &str, game_mode: &str, limit: Option<usize>) -> Result<()> {
        self.send_message(ClientMessage::Subscribe {
            region: region.to_string(),
            game_mode: game_mode.to_string(),
            limit,
        })
        .await
    }

    pub async fn subscribe_global(&mut self, limit: Option<usize>) -> Result<()> {
        self.send_message(ClientMessage::SubscribeGlobal { limit }).await
    }

    pub async fn update_score(&mut self, player_id: &str, region: &str, game_mode: &str, delta: i64) -> Result<()> {
        self.send_message(ClientMessage::UpdateScore {
            player_id: player_id.to_string(),
            name: format!("Name of {}", player_id),
            region: region.to_string(),
            game_mode: game_mode.to_string(),
            score_delta: delta,
        })
        .await
    }

    pub async fn send_ping(&mut self) -> Result<()> {
        let client_time = Utc::now().timestamp_millis();
        self.send_message(ClientMessage::Ping { client_time }).await
    }

    pub async fn send_message(&mut self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.send_text(&json).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    pub async fn receive_message(&mut self) -> Result<ServerMessage> {
        let timeout = tokio::time::timeout(Duration::from_secs(5), self.ws.next()).await;
        match timeout {
            Ok(Some(msg)) => match msg? {
                Message::Text(text) => Ok(serde_json::from_str(&text)?),
                other => Err(anyhow::anyhow!("Unexpected message type: {:?}", other)),
            },
            Ok(None) => Err(anyhow::anyhow!("Connection closed")),
            Err(_) => Err(anyhow::anyhow!("Timeout waiting for message")),
        }
    }

    /// Skip frames until one matches `predicate`.
    pub async fn receive_until<F>(&mut self, mut predicate: F) -> Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let msg = self.receive_message().await?;
            if predicate(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Next leaderboard frame, skipping acks and pongs.
    pub async fn expect_leaderboard(&mut self) -> Result<Vec<LeaderboardEntry>> {
        match self
            .receive_until(|msg| matches!(msg, ServerMessage::LeaderboardUpdate { .. }))
            .await?
        {
            ServerMessage::LeaderboardUpdate { players, .. } => Ok(players),
            _ => unreachable!(),
        }
    }

    /// Next score acknowledgement: `(success, daily_score)`.
    pub async fn expect_score_ack(&mut self) -> Result<(bool, Option<i64>)> {
        match self
            .receive_until(|msg| matches!(msg, ServerMessage::ScoreUpdate { .. }))
            .await?
        {
            ServerMessage::ScoreUpdate {
                success, daily_score, ..
            } => Ok((success, daily_score)),
            _ => unreachable!(),
        }
    }

    pub async fn expect_error(&mut self) -> Result<String> {
        match self
            .receive_until(|msg| matches!(msg, ServerMessage::Error { .. }))
            .await?
        {
            ServerMessage::Error { message } => Ok(message),
            _ => unreachable!(),
        }
    }

    pub async fn expect_pong(&mut self) -> Result<()> {
        let msg = self.receive_message().await?;
        match msg {
            ServerMessage::Pong { .. } => Ok(()),
            _ => Err(anyhow::anyhow!("Expected Pong, got {:?}", msg)),
        }
    }

    /// Assert nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<()> {
        match tokio::time::timeout(wait, self.ws.next()).await {
            Err(_) => Ok(()),
            Ok(Some(Ok(Message::Text(text)))) => Err(anyhow::anyhow!("Unexpected message: {}", text)),
            Ok(other) => Err(anyhow::anyhow!("Unexpected socket event: {:?}", other)),
        }
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
