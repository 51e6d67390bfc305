use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use common::ServerMessage;

use crate::error::{LeaderboardError, Result};

/// Identifies one live client connection.
pub type ConnectionId = String;

/// Delivery to connected clients, individually or by named group.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach the outbound mailbox of a newly accepted connection.
    async fn register(&self, id: &str, sender: mpsc::Sender<ServerMessage>);

    /// Forget a connection and drop it from every group.
    async fn unregister(&self, id: &str);

    async fn join_group(&self, id: &str, group: &str);

    async fn leave_group(&self, id: &str, group: &str);

    /// Queue a message for one connection. Unknown connections are ignored.
    async fn send_to_connection(&self, id: &str, message: ServerMessage) -> Result<()>;

    /// Queue the same message for every member of `group`. Returns the
    /// members that could not be reached.
    async fn send_to_group(&self, group: &str, message: ServerMessage) -> Vec<(ConnectionId, LeaderboardError)>;
}

/// In-process transport backed by one bounded mailbox per connection.
///
/// Sends never wait on a slow client: a full mailbox is reported as a
/// delivery failure for that connection only.
#[derive(Default)]
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
    groups: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        let groups = self.groups.read().await;
        groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ConnectionHub {
    async fn register(&self, id: &str, sender: mpsc::Sender<ServerMessage>) {
        let mut connections = self.connections.write().await;
        connections.insert(id.to_string(), sender);
        debug!("Connection {} registered ({} open)", id, connections.len());
    }

    async fn unregister(&self, id: &str) {
        {
            let mut connections = self.connections.write().await;
            connections.remove(id);
        }
        let mut groups = self.groups.write().await;
        groups.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        debug!("Connection {} unregistered", id);
    }

    async fn join_group(&self, id: &str, group: &str) {
        let mut groups = self.groups.write().await;
        groups.entry(group.to_string()).or_default().insert(id.to_string());
        trace!("Connection {} joined {}", id, group);
    }

    async fn leave_group(&self, id: &str, group: &str) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(group) {
            members.remove(id);
            if members.is_empty() {
                groups.remove(group);
            }
        }
        trace!("Connection {} left {}", id, group);
    }

    async fn send_to_connection(&self, id: &str, message: ServerMessage) -> Result<()> {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(id).cloned()
        };
        let Some(sender) = sender else {
            trace!("Dropping message for unknown connection {}", id);
            return Ok(());
        };

        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => LeaderboardError::Transport(format!("Mailbox of {} is full", id)),
            TrySendError::Closed(_) => LeaderboardError::Transport(format!("Connection {} is closed", id)),
        })
    }

    async fn send_to_group(&self, group: &str, message: ServerMessage) -> Vec<(ConnectionId, LeaderboardError)> {
        let mut failures = Vec::new();
        for id in self.group_members(group).await {
            if let Err(e) = self.send_to_connection(&id, message.clone()).await {
                failures.push((id, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_to_connection() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register("c1", tx).await;

        hub.send_to_connection("c1", ServerMessage::Shutdown).await.unwrap();
        assert_eq!(rx.recv().await, Some(ServerMessage::Shutdown));

        // Unknown connections are a no-op
        hub.send_to_connection("nobody", ServerMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_or_closed_mailbox_fails() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.register("slow", tx).await;
        hub.send_to_connection("slow", ServerMessage::Shutdown).await.unwrap();
        assert!(matches!(
            hub.send_to_connection("slow", ServerMessage::Shutdown).await,
            Err(LeaderboardError::Transport(_))
        ));

        let (tx, rx) = mpsc::channel(1);
        hub.register("gone", tx).await;
        drop(rx);
        assert!(matches!(
            hub.send_to_connection("gone", ServerMessage::Shutdown).await,
            Err(LeaderboardError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_group_fanout_isolates_failures() {
        let hub = ConnectionHub::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        hub.register("c1", tx1).await;
        hub.register("c2", tx2).await;
        hub.join_group("c1", "leaderboard:global").await;
        hub.join_group("c2", "leaderboard:global").await;
        drop(rx2);

        let failures = hub.send_to_group("leaderboard:global", ServerMessage::Shutdown).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "c2");
        assert_eq!(rx1.recv().await, Some(ServerMessage::Shutdown));
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_groups() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(4);
        hub.register("c1", tx).await;
        hub.join_group("c1", "leaderboard:NA:solo").await;
        hub.join_group("c1", "leaderboard:global").await;

        hub.leave_group("c1", "leaderboard:NA:solo").await;
        assert!(hub.group_members("leaderboard:NA:solo").await.is_empty());
        assert_eq!(hub.group_members("leaderboard:global").await, vec!["c1".to_string()]);

        hub.unregister("c1").await;
        assert!(hub.group_members("leaderboard:global").await.is_empty());
        assert_eq!(hub.connection_count().await, 0);
    }
}
