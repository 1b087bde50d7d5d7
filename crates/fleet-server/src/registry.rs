//! In-memory registry of live agent sessions.
//!
//! The registry is a delivery optimization only: the durable queue is the
//! source of truth, and losing this map (restart, crash) just means queued
//! commands wait for the next connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::wire::ServerMessage;

/// A handle to one live agent session.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub agent_id: String,
    /// Distinguishes this session from a replacement on reconnect.
    pub conn_id: String,
    msg_tx: mpsc::Sender<ServerMessage>,
}

impl AgentConnection {
    pub fn new(agent_id: String, conn_id: String, msg_tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            agent_id,
            conn_id,
            msg_tx,
        }
    }

    /// Hand a message to the session's writer task. Fails when the session
    /// has already shut down.
    pub async fn send(&self, message: ServerMessage) -> Result<(), mpsc::error::SendError<ServerMessage>> {
        self.msg_tx.send(message).await
    }
}

/// Shared map of agent ID to its live connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, AgentConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous session for the agent.
    pub async fn register(&self, connection: AgentConnection) {
        let mut connections = self.connections.write().await;
        if let Some(old) = connections.insert(connection.agent_id.clone(), connection) {
            debug!(agent_id = %old.agent_id, "replaced existing agent connection");
        }
    }

    /// Remove the connection for `agent_id`, but only if it is still the
    /// session identified by `conn_id`. Returns whether a removal happened,
    /// so a stale session's cleanup never tears down its replacement.
    pub async fn unregister(&self, agent_id: &str, conn_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(agent_id) {
            Some(current) if current.conn_id == conn_id => {
                connections.remove(agent_id);
                true
            }
            _ => false,
        }
    }

    /// Drop the connection for an agent regardless of session identity.
    pub async fn remove(&self, agent_id: &str) -> Option<AgentConnection> {
        self.connections.write().await.remove(agent_id)
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentConnection> {
        self.connections.read().await.get(agent_id).cloned()
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.connections.read().await.contains_key(agent_id)
    }

    pub async fn connected_agents(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}
