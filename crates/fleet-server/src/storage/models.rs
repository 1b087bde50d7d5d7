//! Data models for fleet server storage.

use serde::{Deserialize, Serialize};

/// A named grouping of mining hardware owned by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Farm {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// One remote process running at a physical site. A farm has at most one
/// agent; the raw credential is never stored, only its hash.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: String,
    pub farm_id: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: i64,
    /// Unix seconds of the most recent contact; `None` until first contact.
    pub last_seen: Option<i64>,
}

/// A physical mining device known to an agent. MAC is the stable identity
/// key within one agent; `password` is write-only and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Miner {
    pub id: String,
    pub agent_id: String,
    pub mac: String,
    pub ip: Option<String>,
    pub model: Option<String>,
    pub worker1: Option<String>,
    pub worker2: Option<String>,
    pub worker3: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub discovered_at: Option<i64>,
}

/// A unit of work destined for exactly one agent, delivered in per-agent
/// sequence order with at most one in flight.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Command {
    pub id: String,
    pub agent_id: String,
    pub seq: i64,
    pub kind: String,
    /// Kind-specific JSON payload.
    pub payload: String,
    pub status: String,
    /// Kind-specific JSON result reported by the agent's ack.
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub acked_at: Option<i64>,
}

/// A single-use install token binding a not-yet-connected agent to a farm.
/// Consumed tokens are retained as audit records.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrollmentToken {
    pub id: String,
    pub farm_id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub issued_at: i64,
    pub consumed_at: Option<i64>,
}

/// The kinds of command an agent can be asked to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Scan,
    RestartMiner,
    PowerOffMiner,
}

impl CommandKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::RestartMiner => "restart_miner",
            Self::PowerOffMiner => "power_off_miner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(Self::Scan),
            "restart_miner" => Some(Self::RestartMiner),
            "power_off_miner" => Some(Self::PowerOffMiner),
            _ => None,
        }
    }
}

/// Command delivery states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Delivered,
    Acked,
    Failed,
}

impl CommandStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Acked => "acked",
            Self::Failed => "failed",
        }
    }
}

/// Partial update of a miner's pool configuration. `Some("")` clears a field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinerConfigUpdate {
    pub worker1: Option<String>,
    pub worker2: Option<String>,
    pub worker3: Option<String>,
    pub password: Option<String>,
}
