//! JSON wire messages exchanged with agents over the WebSocket transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages an agent sends to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Periodic liveness signal; refreshes `last_seen`.
    Heartbeat,
    /// Exactly one ack per delivered command.
    Ack {
        command_id: String,
        ok: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Messages the server sends to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on first contact, after an enrollment token is consumed.
    /// The credential is the agent's long-lived secret for reconnects.
    Enrolled { agent_id: String, credential: String },
    HeartbeatAck,
    /// A command delivered for execution. The agent must respond with one
    /// `Ack` carrying the same `command_id`.
    Command {
        command_id: String,
        seq: i64,
        kind: String,
        payload: Value,
    },
}
