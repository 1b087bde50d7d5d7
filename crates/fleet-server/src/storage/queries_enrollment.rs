//! Enrollment token queries for the fleet server.

use fleet_core::db::{DatabaseError, unix_timestamp};

use super::db::FleetDatabase;
use super::models::{Agent, EnrollmentToken};

impl FleetDatabase {
    /// Store a freshly issued enrollment token (hashed).
    pub async fn create_enrollment_token(
        &self,
        id: &str,
        farm_id: &str,
        token_hash: &str,
    ) -> Result<EnrollmentToken, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO enrollment_tokens (id, farm_id, token_hash, issued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(farm_id)
        .bind(token_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_enrollment_token(id).await
    }

    /// Get an enrollment token by ID.
    pub async fn get_enrollment_token(&self, id: &str) -> Result<EnrollmentToken, DatabaseError> {
        sqlx::query_as::<_, EnrollmentToken>("SELECT * FROM enrollment_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Enrollment token {id}")))
    }

    /// Find an unconsumed token for a farm, if one exists.
    pub async fn unconsumed_token_for_farm(
        &self,
        farm_id: &str,
    ) -> Result<Option<EnrollmentToken>, DatabaseError> {
        let token = sqlx::query_as::<_, EnrollmentToken>(
            "SELECT * FROM enrollment_tokens WHERE farm_id = ? AND consumed_at IS NULL",
        )
        .bind(farm_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(token)
    }

    /// Find an unconsumed token by hash.
    pub async fn unconsumed_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<EnrollmentToken>, DatabaseError> {
        let token = sqlx::query_as::<_, EnrollmentToken>(
            "SELECT * FROM enrollment_tokens WHERE token_hash = ? AND consumed_at IS NULL",
        )
        .bind(token_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(token)
    }

    /// Consume an enrollment token and create the agent it binds, in one
    /// transaction. The guarded UPDATE makes double-consumption impossible:
    /// the second caller sees zero rows updated and gets `None`. Any agent
    /// already enrolled for the farm is replaced (its miners and queued
    /// commands cascade away with it).
    pub async fn consume_enrollment_token(
        &self,
        token_hash: &str,
        agent_id: &str,
        credential_hash: &str,
    ) -> Result<Option<Agent>, DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let consumed = sqlx::query_as::<_, EnrollmentToken>(
            "UPDATE enrollment_tokens SET consumed_at = ?
             WHERE token_hash = ? AND consumed_at IS NULL
             RETURNING *",
        )
        .bind(now)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(token) = consumed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM agents WHERE farm_id = ?")
            .bind(&token.farm_id)
            .execute(&mut *tx)
            .await?;

        let agent = sqlx::query_as::<_, Agent>(
            "INSERT INTO agents (id, farm_id, credential_hash, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING *",
        )
        .bind(agent_id)
        .bind(&token.farm_id)
        .bind(credential_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(agent))
    }
}
