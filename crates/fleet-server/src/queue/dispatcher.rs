//! Command delivery over live agent sessions.
//!
//! The durable queue in SQLite is the source of truth; the dispatcher only
//! moves commands between it and whichever session the registry currently
//! holds. At most one command per agent is in flight at a time, and the
//! next one goes out only after the previous ack lands.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::FleetError;
use crate::registry::ConnectionRegistry;
use crate::storage::{Command, CommandKind, CommandStatus, FleetDatabase};
use crate::wire::ServerMessage;
use fleet_core::db::unix_timestamp;

/// What happened to a freshly enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to a live session immediately.
    Dispatched,
    /// Stored for delivery on the agent's next connection. Not an error.
    Queued,
}

impl Dispatch {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Queued => "queued",
        }
    }
}

#[derive(Clone)]
pub struct CommandDispatcher {
    db: FleetDatabase,
    registry: ConnectionRegistry,
    ack_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(db: FleetDatabase, registry: ConnectionRegistry, ack_timeout: Duration) -> Self {
        Self {
            db,
            registry,
            ack_timeout,
        }
    }

    /// Append a command to the agent's queue and attempt immediate
    /// delivery. Succeeds whether or not the agent is connected.
    pub async fn enqueue(
        &self,
        agent_id: &str,
        kind: CommandKind,
        payload: &Value,
    ) -> Result<(Command, Dispatch), FleetError> {
        self.db.get_agent(agent_id).await?;

        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .enqueue_command(&id, agent_id, kind, &payload.to_string())
            .await?;

        self.deliver_next(agent_id).await?;

        // The outcome reflects what actually happened to this command, not
        // agent connectivity: behind an in-flight command, or after a failed
        // handoff, the row is still pending and the caller is told `queued`.
        let command = self.db.get_command(&id).await?;
        let dispatch = if command.status == CommandStatus::Pending.as_str() {
            Dispatch::Queued
        } else {
            Dispatch::Dispatched
        };

        info!(
            agent_id = %agent_id,
            command_id = %command.id,
            seq = command.seq,
            kind = %command.kind,
            outcome = dispatch.as_str(),
            "command enqueued"
        );
        Ok((command, dispatch))
    }

    /// Push the oldest pending command to the agent's live session, if it
    /// has one and nothing else is in flight.
    pub async fn deliver_next(&self, agent_id: &str) -> Result<Option<Command>, FleetError> {
        let Some(connection) = self.registry.get(agent_id).await else {
            return Ok(None);
        };

        let Some(command) = self.db.claim_next_deliverable(agent_id).await? else {
            return Ok(None);
        };

        let payload: Value =
            serde_json::from_str(&command.payload).unwrap_or(Value::Null);
        let message = ServerMessage::Command {
            command_id: command.id.clone(),
            seq: command.seq,
            kind: command.kind.clone(),
            payload,
        };

        if connection.send(message).await.is_err() {
            // Session closed between lookup and send; put the command back.
            warn!(agent_id = %agent_id, command_id = %command.id, "delivery handoff failed, requeueing");
            self.db.requeue_command(&command.id).await?;
            return Ok(None);
        }

        debug!(agent_id = %agent_id, command_id = %command.id, seq = command.seq, "command delivered");
        Ok(Some(command))
    }

    /// Record an agent's ack and advance its queue. A late ack for a
    /// command that already timed out or was requeued is ignored.
    pub async fn handle_ack(
        &self,
        agent_id: &str,
        command_id: &str,
        ok: bool,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<Option<Command>, FleetError> {
        let result_json = result.map(Value::to_string);
        let acked = self
            .db
            .ack_command(command_id, ok, result_json.as_deref(), error)
            .await?;

        let Some(command) = acked else {
            warn!(agent_id = %agent_id, command_id = %command_id, "ignoring ack for non-in-flight command");
            return Ok(None);
        };

        info!(
            agent_id = %agent_id,
            command_id = %command.id,
            status = %command.status,
            "command acknowledged"
        );
        self.deliver_next(agent_id).await?;
        Ok(Some(command))
    }

    /// A session closed: put its in-flight command back at the head of the
    /// queue so it is redelivered, in order, on the next connection.
    pub async fn handle_disconnect(&self, agent_id: &str) -> Result<(), FleetError> {
        let requeued = self.db.requeue_in_flight(agent_id).await?;
        if requeued > 0 {
            debug!(agent_id = %agent_id, requeued, "requeued in-flight command on disconnect");
        }
        Ok(())
    }

    /// Fail every in-flight command whose ack never arrived within the
    /// timeout, then unblock the affected queues.
    pub async fn sweep_overdue(&self) -> Result<usize, FleetError> {
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = unix_timestamp() - self.ack_timeout.as_secs() as i64;
        let failed = self.db.fail_overdue_commands(cutoff).await?;

        let mut agents = HashSet::new();
        for command in &failed {
            warn!(
                agent_id = %command.agent_id,
                command_id = %command.id,
                seq = command.seq,
                "command failed: ack timeout"
            );
            agents.insert(command.agent_id.clone());
        }

        for agent_id in agents {
            self.deliver_next(&agent_id).await?;
        }

        Ok(failed.len())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::AgentConnection;

    async fn dispatcher() -> CommandDispatcher {
        let db = FleetDatabase::open_in_memory().await.unwrap();
        db.create_farm("f1", "East Hall").await.unwrap();
        db.create_agent("a1", "f1", "hash").await.unwrap();
        CommandDispatcher::new(db, ConnectionRegistry::new(), Duration::from_secs(30))
    }

    /// Attach a fake live session and return its message stream.
    async fn connect(
        dispatcher: &CommandDispatcher,
        agent_id: &str,
        conn_id: &str,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(16);
        dispatcher
            .registry
            .register(AgentConnection::new(
                agent_id.to_owned(),
                conn_id.to_owned(),
                tx,
            ))
            .await;
        rx
    }

    fn expect_command(msg: ServerMessage) -> (String, i64) {
        match msg {
            ServerMessage::Command {
                command_id, seq, ..
            } => (command_id, seq),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_enqueue_is_queued_and_pending() {
        let dispatcher = dispatcher().await;

        let (command, outcome) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatch::Queued);
        assert_eq!(command.status, "pending");
    }

    #[tokio::test]
    async fn enqueue_for_unknown_agent_fails() {
        let dispatcher = dispatcher().await;
        assert!(matches!(
            dispatcher
                .enqueue("ghost", CommandKind::Scan, &serde_json::json!({}))
                .await,
            Err(FleetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn online_enqueue_dispatches_immediately() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (command, outcome) = dispatcher
            .enqueue("a1", CommandKind::RestartMiner, &serde_json::json!({"miner_id": "m1"}))
            .await
            .unwrap();

        assert_eq!(outcome, Dispatch::Dispatched);
        assert_eq!(command.status, "delivered");

        let (delivered_id, seq) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, command.id);
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn second_command_waits_for_ack() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (first, _) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        let (second, _) = dispatcher
            .enqueue("a1", CommandKind::RestartMiner, &serde_json::json!({}))
            .await
            .unwrap();

        // Only the first command goes out.
        let (delivered_id, _) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, first.id);
        assert!(rx.try_recv().is_err());
        assert_eq!(second.status, "pending");

        // Its ack releases the second.
        dispatcher
            .handle_ack("a1", &first.id, true, None, None)
            .await
            .unwrap()
            .unwrap();
        let (delivered_id, seq) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, second.id);
        assert_eq!(seq, 2);
    }

    #[tokio::test]
    async fn enqueue_behind_in_flight_reports_queued() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (first, outcome) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, Dispatch::Dispatched);
        expect_command(rx.recv().await.unwrap());

        // The agent is connected, but the first command is still in flight:
        // this one was not handed to the transport, so it is queued.
        let (second, outcome) = dispatcher
            .enqueue("a1", CommandKind::RestartMiner, &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, Dispatch::Queued);
        assert_eq!(second.status, "pending");

        dispatcher
            .handle_ack("a1", &first.id, true, None, None)
            .await
            .unwrap();
        let (delivered_id, _) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, second.id);
    }

    #[tokio::test]
    async fn failed_ack_marks_command_failed_and_advances() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (first, _) = dispatcher
            .enqueue("a1", CommandKind::PowerOffMiner, &serde_json::json!({}))
            .await
            .unwrap();
        let (second, _) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        expect_command(rx.recv().await.unwrap());

        let failed = dispatcher
            .handle_ack("a1", &first.id, false, None, Some("device unreachable"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.error.as_deref(), Some("device unreachable"));

        let (delivered_id, _) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, second.id);
    }

    #[tokio::test]
    async fn disconnect_requeues_and_redelivers_in_order() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (first, _) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        dispatcher
            .enqueue("a1", CommandKind::RestartMiner, &serde_json::json!({}))
            .await
            .unwrap();
        expect_command(rx.recv().await.unwrap());

        // Session drops before the ack arrives.
        assert!(dispatcher.registry.unregister("a1", "s1").await);
        dispatcher.handle_disconnect("a1").await.unwrap();
        drop(rx);

        // On reconnect the same command is delivered first.
        let mut rx = connect(&dispatcher, "a1", "s2").await;
        dispatcher.deliver_next("a1").await.unwrap();
        let (delivered_id, seq) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, first.id);
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn overdue_sweep_fails_silent_command() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        let (first, _) = dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        let (second, _) = dispatcher
            .enqueue("a1", CommandKind::RestartMiner, &serde_json::json!({}))
            .await
            .unwrap();
        expect_command(rx.recv().await.unwrap());

        // Backdate the delivery so the sweep sees it as overdue.
        sqlx::query("UPDATE commands SET delivered_at = delivered_at - 3600 WHERE id = ?")
            .bind(&first.id)
            .execute(dispatcher.db.pool())
            .await
            .unwrap();

        assert_eq!(dispatcher.sweep_overdue().await.unwrap(), 1);
        assert_eq!(dispatcher.db.get_command(&first.id).await.unwrap().status, "failed");

        // The queue is unblocked for the connected agent.
        let (delivered_id, _) = expect_command(rx.recv().await.unwrap());
        assert_eq!(delivered_id, second.id);

        // A late ack from the agent is ignored.
        assert!(
            dispatcher
                .handle_ack("a1", &first.id, true, None, None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sweep_with_nothing_overdue_is_a_noop() {
        let dispatcher = dispatcher().await;
        let mut rx = connect(&dispatcher, "a1", "s1").await;

        dispatcher
            .enqueue("a1", CommandKind::Scan, &serde_json::json!({}))
            .await
            .unwrap();
        expect_command(rx.recv().await.unwrap());

        assert_eq!(dispatcher.sweep_overdue().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }
}
