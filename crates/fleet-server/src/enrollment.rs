//! Single-use enrollment tokens and agent authentication.
//!
//! A token is minted for one farm, handed out exactly once through the
//! install flow, and consumed atomically on first connect. Only hashes of
//! tokens and agent credentials ever touch the database.

use rand::RngExt;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::FleetError;
use crate::storage::{Agent, EnrollmentToken, FleetDatabase};

/// Outcome of authenticating a connecting agent.
#[derive(Debug)]
pub enum AgentAuth {
    /// A previously enrolled agent presented its long-lived credential.
    Existing(Agent),
    /// An enrollment token was consumed; the raw credential must be sent
    /// back to the agent once, it is not recoverable afterwards.
    Enrolled { agent: Agent, credential: String },
}

impl AgentAuth {
    #[must_use]
    pub fn agent(&self) -> &Agent {
        match self {
            Self::Existing(agent) | Self::Enrolled { agent, .. } => agent,
        }
    }
}

/// Issues and redeems enrollment tokens.
#[derive(Clone)]
pub struct EnrollmentService {
    db: FleetDatabase,
}

impl EnrollmentService {
    pub fn new(db: FleetDatabase) -> Self {
        Self { db }
    }

    /// Issue a fresh token for a farm. At most one unconsumed token may
    /// exist per farm at a time.
    pub async fn issue(&self, farm_id: &str) -> Result<String, FleetError> {
        self.db.get_farm(farm_id).await?;

        if self.db.unconsumed_token_for_farm(farm_id).await?.is_some() {
            return Err(FleetError::Conflict(format!(
                "farm {farm_id} already has an outstanding enrollment token"
            )));
        }

        let token = generate_secret();
        let id = Uuid::new_v4().to_string();
        self.db
            .create_enrollment_token(&id, farm_id, &hash_secret(&token))
            .await?;

        info!(farm_id = %farm_id, token_id = %id, "issued enrollment token");
        Ok(token)
    }

    /// Validate a token without consuming it (install-script download).
    pub async fn peek(&self, token: &str) -> Result<EnrollmentToken, FleetError> {
        self.db
            .unconsumed_token_by_hash(&hash_secret(token))
            .await?
            .ok_or_else(|| FleetError::Unauthorized("invalid or consumed enrollment token".into()))
    }

    /// Consume a token, enrolling a new agent for its farm. The returned
    /// credential is the agent's long-lived secret for reconnects.
    pub async fn consume(&self, token: &str) -> Result<(Agent, String), FleetError> {
        let credential = generate_secret();
        let agent_id = Uuid::new_v4().to_string();

        let agent = self
            .db
            .consume_enrollment_token(&hash_secret(token), &agent_id, &hash_secret(&credential))
            .await?
            .ok_or_else(|| FleetError::Unauthorized("invalid or consumed enrollment token".into()))?;

        info!(agent_id = %agent.id, farm_id = %agent.farm_id, "agent enrolled");
        Ok((agent, credential))
    }

    /// Authenticate a connecting agent by secret: first as a long-lived
    /// credential, then as a not-yet-consumed enrollment token.
    pub async fn authenticate(&self, secret: &str) -> Result<AgentAuth, FleetError> {
        if let Some(agent) = self
            .db
            .get_agent_by_credential_hash(&hash_secret(secret))
            .await?
        {
            return Ok(AgentAuth::Existing(agent));
        }

        let (agent, credential) = self.consume(secret).await?;
        Ok(AgentAuth::Enrolled { agent, credential })
    }
}

/// 256 bits of randomness, hex encoded.
fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
