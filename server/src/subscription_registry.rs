use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{LeaderboardSnapshot, PartitionKey, ServerMessage};

use crate::error::{Result, validate_limit};
use crate::refresher::PartitionRefresher;
use crate::transport::{ConnectionId, Transport};

/// Outcome of a subscribe request.
#[derive(Debug, Clone)]
pub struct Subscribed {
    pub partition: PartitionKey,
    pub limit: usize,
    pub snapshot: Arc<LeaderboardSnapshot>,
}

impl Subscribed {
    /// The frame a new subscriber receives first.
    pub fn initial_frame(&self) -> ServerMessage {
        ServerMessage::leaderboard_update(&self.snapshot, self.limit, None)
    }
}

/// Which connections watch which partition, and how many rows each wants.
pub struct SubscriptionRegistry {
    refresher: Arc<PartitionRefresher>,
    transport: Arc<dyn Transport>,
    members: RwLock<HashMap<PartitionKey, HashMap<ConnectionId, usize>>>,
}

impl SubscriptionRegistry {
    pub fn new(refresher: Arc<PartitionRefresher>, transport: Arc<dyn Transport>) -> Self {
        Self {
            refresher,
            transport,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Add `connection` to `partition` and return the snapshot it should see.
    ///
    /// Subscribing again replaces the previous limit. If the snapshot cannot
    /// be produced the membership is rolled back.
    pub async fn subscribe(
        &self,
        connection: &str,
        partition: PartitionKey,
        limit: Option<usize>,
    ) -> Result<Subscribed> {
        let limit = validate_limit(limit.unwrap_or(self.refresher.cache().default_depth()))?;

        let previous = {
            let mut members = self.members.write().await;
            members
                .entry(partition)
                .or_default()
                .insert(connection.to_string(), limit)
        };
        self.transport.join_group(connection, &partition.group_id()).await;

        match self.refresher.snapshot(partition, limit).await {
            Ok(snapshot) => {
                info!("Connection {} subscribed to {} (limit {})", connection, partition, limit);
                Ok(Subscribed {
                    partition,
                    limit,
                    snapshot,
                })
            }
            Err(e) => {
                match previous {
                    Some(old_limit) => {
                        let mut members = self.members.write().await;
                        members.entry(partition).or_default().insert(connection.to_string(), old_limit);
                    }
                    None => self.remove_member(connection, partition).await,
                }
                Err(e)
            }
        }
    }

    /// Remove `connection` from `partition`. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, connection: &str, partition: PartitionKey) -> bool {
        let removed = {
            let members = self.members.read().await;
            members
                .get(&partition)
                .is_some_and(|conns| conns.contains_key(connection))
        };
        if removed {
            self.remove_member(connection, partition).await;
            info!("Connection {} unsubscribed from {}", connection, partition);
        }
        removed
    }

    /// Drop every subscription held by `connection`.
    pub async fn unsubscribe_all(&self, connection: &str) {
        let partitions: Vec<PartitionKey> = {
            let members = self.members.read().await;
            members
                .iter()
                .filter(|(_, conns)| conns.contains_key(connection))
                .map(|(partition, _)| *partition)
                .collect()
        };
        for partition in &partitions {
            self.remove_member(connection, *partition).await;
        }
        debug!("Connection {} dropped {} subscriptions", connection, partitions.len());
    }

    /// Current subscribers of `partition` with their limits.
    pub async fn members_of(&self, partition: PartitionKey) -> Vec<(ConnectionId, usize)> {
        let members = self.members.read().await;
        members
            .get(&partition)
            .map(|conns| conns.iter().map(|(id, k)| (id.clone(), *k)).collect())
            .unwrap_or_default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.members.read().await.values().map(HashMap::len).sum()
    }

    async fn remove_member(&self, connection: &str, partition: PartitionKey) {
        {
            let mut members = self.members.write().await;
            if let Some(conns) = members.get_mut(&partition) {
                conns.remove(connection);
                if conns.is_empty() {
                    members.remove(&partition);
                }
            }
        }
        self.transport.leave_group(connection, &partition.group_id()).await;
    }
}
