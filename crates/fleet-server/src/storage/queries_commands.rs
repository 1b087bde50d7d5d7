//! Command queue queries for the fleet server.
//!
//! Sequence numbers are assigned inside the INSERT itself and the
//! pending->delivered transition is a single guarded UPDATE, so the
//! per-agent ordering and single-in-flight invariants hold without an
//! application-level lock even under concurrent API calls.

use fleet_core::db::{DatabaseError, unix_timestamp};

use super::db::FleetDatabase;
use super::models::{Command, CommandKind, CommandStatus};

impl FleetDatabase {
    /// Append a command with the next sequence number for the agent,
    /// status `pending`. Succeeds regardless of agent connectivity.
    pub async fn enqueue_command(
        &self,
        id: &str,
        agent_id: &str,
        kind: CommandKind,
        payload: &str,
    ) -> Result<Command, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO commands (id, agent_id, seq, kind, payload, status, created_at)
             SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, 'pending', ?
             FROM commands WHERE agent_id = ?",
        )
        .bind(id)
        .bind(agent_id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(now)
        .bind(agent_id)
        .execute(self.pool())
        .await?;

        self.get_command(id).await
    }

    /// Get a command by ID.
    pub async fn get_command(&self, id: &str) -> Result<Command, DatabaseError> {
        sqlx::query_as::<_, Command>("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Command {id}")))
    }

    /// List commands for an agent in sequence order.
    pub async fn list_commands(&self, agent_id: &str) -> Result<Vec<Command>, DatabaseError> {
        let commands = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands WHERE agent_id = ? ORDER BY seq",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        Ok(commands)
    }

    /// Atomically claim the oldest pending command for delivery.
    ///
    /// Returns `None` when there is nothing pending or another command for
    /// this agent is already in flight; the NOT EXISTS guard and the
    /// transition run in one statement, so two racing callers can never
    /// both claim.
    pub async fn claim_next_deliverable(
        &self,
        agent_id: &str,
    ) -> Result<Option<Command>, DatabaseError> {
        let now = unix_timestamp();

        let command = sqlx::query_as::<_, Command>(
            "UPDATE commands SET status = 'delivered', delivered_at = ?1
             WHERE id = (
                 SELECT id FROM commands
                 WHERE agent_id = ?2 AND status = 'pending'
                   AND NOT EXISTS (
                       SELECT 1 FROM commands WHERE agent_id = ?2 AND status = 'delivered'
                   )
                 ORDER BY seq ASC LIMIT 1
             )
             RETURNING *",
        )
        .bind(now)
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(command)
    }

    /// Record the agent's ack for an in-flight command. Returns `None` if
    /// the command is not currently `delivered` (late ack after a timeout,
    /// redelivery, or agent deletion).
    pub async fn ack_command(
        &self,
        id: &str,
        ok: bool,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<Option<Command>, DatabaseError> {
        let now = unix_timestamp();
        let status = if ok {
            CommandStatus::Acked
        } else {
            CommandStatus::Failed
        };

        let command = sqlx::query_as::<_, Command>(
            "UPDATE commands SET status = ?, result = ?, error = ?, acked_at = ?
             WHERE id = ? AND status = 'delivered'
             RETURNING *",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(command)
    }

    /// Reset an agent's in-flight command back to pending so it is
    /// redelivered, in order, on the next connection.
    pub async fn requeue_in_flight(&self, agent_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'pending', delivered_at = NULL
             WHERE agent_id = ? AND status = 'delivered'",
        )
        .bind(agent_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Reset a single command back to pending (delivery handoff failed).
    pub async fn requeue_command(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'pending', delivered_at = NULL
             WHERE id = ? AND status = 'delivered'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every in-flight command delivered at or before `cutoff` whose
    /// ack never arrived. Failed commands are retained for audit and are
    /// not retried automatically.
    pub async fn fail_overdue_commands(
        &self,
        cutoff: i64,
    ) -> Result<Vec<Command>, DatabaseError> {
        let now = unix_timestamp();

        let commands = sqlx::query_as::<_, Command>(
            "UPDATE commands SET status = 'failed', error = 'ack timeout', acked_at = ?
             WHERE status = 'delivered' AND delivered_at <= ?
             RETURNING *",
        )
        .bind(now)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(commands)
    }

    /// The most recent successfully acked scan result for an agent, if any.
    pub async fn latest_scan_result(
        &self,
        agent_id: &str,
    ) -> Result<Option<Command>, DatabaseError> {
        let command = sqlx::query_as::<_, Command>(
            "SELECT * FROM commands
             WHERE agent_id = ? AND kind = 'scan' AND status = 'acked'
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(command)
    }

    /// Count commands for an agent in a given status.
    pub async fn count_commands_in_status(
        &self,
        agent_id: &str,
        status: CommandStatus,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM commands WHERE agent_id = ? AND status = ?")
                .bind(agent_id)
                .bind(status.as_str())
                .fetch_one(self.pool())
                .await?;

        Ok(row.0)
    }
}
