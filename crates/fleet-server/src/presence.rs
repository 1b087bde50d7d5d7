//! Agent presence derived from heartbeat recency.
//!
//! Presence is a pure function of the stored `last_seen` timestamp: an agent
//! is online when its last contact falls within the liveness window, and the
//! answer survives server restarts because nothing else feeds into it.

use std::time::Duration;

use serde::Serialize;

use crate::storage::{DatabaseError, FleetDatabase};
use fleet_core::db::unix_timestamp;

/// Observable connectivity of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Last contact is within the liveness window.
    Online,
    /// Last contact is older than the liveness window.
    Offline,
    /// The agent has never made contact.
    Unknown,
}

/// Classify a `last_seen` timestamp against `now` and the liveness window.
#[must_use]
pub fn connection_state(last_seen: Option<i64>, now: i64, window: Duration) -> ConnectionState {
    match last_seen {
        None => ConnectionState::Unknown,
        #[allow(clippy::cast_possible_wrap)]
        Some(seen) if now.saturating_sub(seen) <= window.as_secs() as i64 => {
            ConnectionState::Online
        }
        Some(_) => ConnectionState::Offline,
    }
}

/// Records agent contacts and answers presence queries.
#[derive(Clone)]
pub struct PresenceTracker {
    db: FleetDatabase,
    window: Duration,
}

impl PresenceTracker {
    pub fn new(db: FleetDatabase, window: Duration) -> Self {
        Self { db, window }
    }

    /// Advance the agent's `last_seen` to now. Returns false when the agent
    /// no longer exists, which tells an open session to shut down.
    pub async fn record_contact(&self, agent_id: &str) -> Result<bool, DatabaseError> {
        self.db.record_agent_contact(agent_id, unix_timestamp()).await
    }

    /// Current presence of an agent based on its stored `last_seen`.
    pub fn state(&self, last_seen: Option<i64>) -> ConnectionState {
        connection_state(last_seen, unix_timestamp(), self.window)
    }

    pub async fn is_online(&self, agent_id: &str) -> Result<bool, DatabaseError> {
        let agent = self.db.get_agent(agent_id).await?;
        Ok(self.state(agent.last_seen) == ConnectionState::Online)
    }
}
