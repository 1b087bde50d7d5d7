//! WebSocket sessions for connected agents.
//!
//! An agent authenticates before the upgrade with either its long-lived
//! credential or a single-use enrollment token. The session then splits
//! into a writer task fed from the registry channel and a read loop that
//! handles heartbeats and command acks.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::enrollment::AgentAuth;
use crate::registry::AgentConnection;
use crate::wire::{AgentMessage, ServerMessage};

/// Outbound channel depth per session.
const SESSION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub token: String,
}

/// `GET /agents/ws?token=...` - authenticate and upgrade to a session.
///
/// An enrollment token is consumed here, before the upgrade. A client that
/// drops before receiving the `enrolled` frame has spent its token without
/// learning its credential; recovery is a freshly issued token for the farm,
/// whose consumption replaces the half-enrolled agent.
pub async fn agent_ws(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = match state.enrollment.authenticate(&query.token).await {
        Ok(auth) => auth,
        Err(err) => {
            warn!("agent connection rejected: {err}");
            return ApiError::from(err).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_session(state, auth, socket))
}

async fn run_session(state: AppState, auth: AgentAuth, socket: WebSocket) {
    let agent_id = auth.agent().id.clone();
    let conn_id = Uuid::new_v4().to_string();

    let (mut sink, mut stream) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(SESSION_CHANNEL_CAPACITY);

    // Writer task: everything the server sends goes through this channel,
    // including deliveries pushed by the dispatcher from other tasks.
    let writer = tokio::spawn(async move {
        while let Some(message) = msg_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    state
        .registry
        .register(AgentConnection::new(
            agent_id.clone(),
            conn_id.clone(),
            msg_tx.clone(),
        ))
        .await;

    // A fresh enrollment gets its long-lived credential exactly once.
    if let AgentAuth::Enrolled { agent, credential } = &auth {
        let message = ServerMessage::Enrolled {
            agent_id: agent.id.clone(),
            credential: credential.clone(),
        };
        if msg_tx.send(message).await.is_err() {
            warn!(agent_id = %agent_id, "session closed before enrollment handshake");
        }
    }

    info!(agent_id = %agent_id, conn_id = %conn_id, "agent session opened");

    // The connection itself counts as contact, and anything queued while
    // the agent was offline goes out now.
    match state.presence.record_contact(&agent_id).await {
        Ok(true) => {
            if let Err(err) = state.dispatcher.deliver_next(&agent_id).await {
                error!(agent_id = %agent_id, "initial delivery failed: {err}");
            }
        }
        Ok(false) => {
            info!(agent_id = %agent_id, "agent deleted, closing session");
            close_session(&state, &agent_id, &conn_id).await;
            writer.abort();
            return;
        }
        Err(err) => {
            error!(agent_id = %agent_id, "presence update failed: {err}");
        }
    }

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            // Ping/pong are handled by the transport.
            Ok(_) => continue,
        };

        let parsed: AgentMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(agent_id = %agent_id, "ignoring malformed agent message: {err}");
                continue;
            }
        };

        // Every inbound frame refreshes presence. A vanished agent row
        // means the farm was deleted out from under this session.
        match state.presence.record_contact(&agent_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(agent_id = %agent_id, "agent deleted, closing session");
                break;
            }
            Err(err) => {
                error!(agent_id = %agent_id, "presence update failed: {err}");
                break;
            }
        }

        match parsed {
            AgentMessage::Heartbeat => {
                debug!(agent_id = %agent_id, "heartbeat");
                if msg_tx.send(ServerMessage::HeartbeatAck).await.is_err() {
                    break;
                }
            }
            AgentMessage::Ack {
                command_id,
                ok,
                result,
                error,
            } => {
                if let Err(err) = state
                    .dispatcher
                    .handle_ack(&agent_id, &command_id, ok, result.as_ref(), error.as_deref())
                    .await
                {
                    error!(agent_id = %agent_id, command_id = %command_id, "ack handling failed: {err}");
                }
            }
        }
    }

    close_session(&state, &agent_id, &conn_id).await;
    writer.abort();
    info!(agent_id = %agent_id, conn_id = %conn_id, "agent session closed");
}

/// Tear down registry state for this session. The conn-id guard makes the
/// cleanup a no-op when a reconnect has already replaced us, so a command
/// delivered on the new session is never requeued by the old one.
async fn close_session(state: &AppState, agent_id: &str, conn_id: &str) {
    if state.registry.unregister(agent_id, conn_id).await {
        if let Err(err) = state.dispatcher.handle_disconnect(agent_id).await {
            error!(agent_id = %agent_id, "disconnect handling failed: {err}");
        }
    }
}
