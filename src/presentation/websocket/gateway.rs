//! WebSocket Gateway
//!
//! Owns the process-local mapping from user id to open connections.
//! A connection joins as exactly one user at a time; a user may hold any
//! number of connections.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::application::services::ConnectionRegistry;
use crate::domain::ConnectionId;
use crate::infrastructure::metrics;

/// Outbound half of one connection.
struct ConnectedClient {
    user_id: Option<String>,
    sender: mpsc::UnboundedSender<String>,
}

/// Connection registry shared by the socket handlers and the notifier.
#[derive(Default)]
pub struct Gateway {
    connections: DashMap<ConnectionId, ConnectedClient>,
    user_connections: DashMap<String, HashSet<ConnectionId>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened connection that has not joined yet.
    pub fn register(&self, connection_id: ConnectionId, sender: mpsc::UnboundedSender<String>) {
        self.connections.insert(
            connection_id,
            ConnectedClient {
                user_id: None,
                sender,
            },
        );
        metrics::set_realtime_connections(self.connections.len());
        tracing::debug!(connection_id = %connection_id, "Connection registered");
    }

    /// Bind a connection to `user_id`, leaving any user it joined before.
    ///
    /// Returns false for unknown connections.
    pub fn join(&self, connection_id: ConnectionId, user_id: &str) -> bool {
        let previous = match self.connections.get_mut(&connection_id) {
            Some(mut client) => client.user_id.replace(user_id.to_string()),
            None => return false,
        };

        if let Some(previous) = previous.filter(|p| p != user_id) {
            self.leave(&previous, connection_id);
        }
        self.user_connections
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);

        tracing::info!(connection_id = %connection_id, user_id, "Connection joined");
        true
    }

    /// Drop a connection from every mapping.
    pub fn unregister(&self, connection_id: ConnectionId) {
        if let Some((_, client)) = self.connections.remove(&connection_id) {
            if let Some(user_id) = client.user_id {
                self.leave(&user_id, connection_id);
                tracing::info!(connection_id = %connection_id, user_id = %user_id, "Connection closed");
            }
        }
        metrics::set_realtime_connections(self.connections.len());
    }

    fn leave(&self, user_id: &str, connection_id: ConnectionId) {
        let now_empty = match self.user_connections.get_mut(user_id) {
            Some(mut set) => {
                set.remove(&connection_id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.user_connections
                .remove_if(user_id, |_, set| set.is_empty());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of open connections joined as `user_id`
    pub fn connections_of(&self, user_id: &str) -> usize {
        self.user_connections
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

impl ConnectionRegistry for Gateway {
    fn push_to_user(&self, user_id: &str, frame: &str) -> usize {
        // Copy the ids out so no guard on one map is held while reading the other.
        let ids: Vec<ConnectionId> = match self.user_connections.get(user_id) {
            Some(set) => set.iter().copied().collect(),
            None => return 0,
        };

        ids.into_iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .map(|client| client.sender.send(frame.to_string()).is_ok())
                    .unwrap_or(false)
            })
            .count()
    }
}
