//! Agent lifecycle handlers: enrollment, presence views, scans, miner
//! registration, and command inspection.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{ApiError, AppState};
use crate::error::FleetError;
use crate::presence::ConnectionState;
use crate::storage::{Agent, Command, CommandKind, Miner};

const INSTALL_SH: &str = include_str!("scripts/install.sh");

/// An agent as shown to operators: the stored row plus derived presence.
#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub connection_state: ConnectionState,
    pub miner_count: i64,
}

// =========================================================================
// Enrollment
// =========================================================================

/// `POST /farms/{id}/agents` - issue a single-use enrollment token.
pub async fn issue_enrollment(
    State(state): State<AppState>,
    Path(farm_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let token = state.enrollment.issue(&farm_id).await?;
    let install_url = format!("{}/agents/install?token={token}", state.public_url);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": token,
            "install_url": install_url,
            "install_command": format!("curl -fsSL '{install_url}' | sh"),
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct InstallQuery {
    token: String,
}

/// `GET /agents/install?token=...` - the install script bound to a token.
/// An unknown or consumed token reads as a missing resource rather than
/// confirming the token ever existed.
pub async fn install_script(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state.enrollment.peek(&query.token).await.is_err() {
        return Err(FleetError::NotFound("install script".into()).into());
    }

    let script = INSTALL_SH
        .replace("TOKEN_PLACEHOLDER", &query.token)
        .replace("SERVER_URL_PLACEHOLDER", &state.public_url);
    Ok(([("content-type", "text/x-shellscript")], script))
}

// =========================================================================
// Presence views
// =========================================================================

async fn agent_view(state: &AppState, agent: Agent) -> Result<AgentView, ApiError> {
    let miner_count = state.db.count_miners(&agent.id).await?;
    let connection_state = state.presence.state(agent.last_seen);
    Ok(AgentView {
        agent,
        connection_state,
        miner_count,
    })
}

/// `GET /agents`
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentView>>, ApiError> {
    let mut views = Vec::new();
    for agent in state.db.list_agents().await? {
        views.push(agent_view(&state, agent).await?);
    }
    Ok(Json(views))
}

#[derive(Debug, Serialize)]
pub struct AgentDetail {
    #[serde(flatten)]
    pub agent: AgentView,
    pub miners: Vec<Miner>,
}

/// `GET /agents/{id}`
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentDetail>, ApiError> {
    let agent = state.db.get_agent(&id).await?;
    let miners = state.db.list_miners(Some(&id)).await?;
    Ok(Json(AgentDetail {
        agent: agent_view(&state, agent).await?,
        miners,
    }))
}

// =========================================================================
// Scans and miner registration
// =========================================================================

/// `POST /agents/{id}/scan` - queue a network scan. The response carries
/// the dispatch outcome plus the devices found by the latest completed
/// scan, so operators see cached results while a new scan is in flight.
pub async fn scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (command, outcome) = state
        .dispatcher
        .enqueue(&id, CommandKind::Scan, &json!({}))
        .await?;

    let discovered = match state.db.latest_scan_result(&id).await? {
        Some(done) => done
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|value| value.get("discovered").cloned())
            .unwrap_or_else(|| json!([])),
        None => json!([]),
    };

    Ok(Json(json!({
        "status": outcome.as_str(),
        "command_id": command.id,
        "discovered": discovered,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MinerReport {
    mac: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterMinersRequest {
    miners: Vec<MinerReport>,
}

/// `POST /agents/{id}/miners/register` - upsert discovered devices by MAC.
pub async fn register_miners(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RegisterMinersRequest>,
) -> Result<Json<Value>, ApiError> {
    state.db.get_agent(&id).await?;

    if request.miners.is_empty() {
        return Err(FleetError::InvalidArgument("no miners to register".into()).into());
    }
    for report in &request.miners {
        if !report.mac.contains(':') {
            return Err(FleetError::InvalidArgument(format!(
                "invalid MAC address: {}",
                report.mac
            ))
            .into());
        }
    }

    let mut registered = 0u64;
    for report in &request.miners {
        state
            .db
            .upsert_miner(
                &id,
                &report.mac,
                report.ip.as_deref(),
                report.model.as_deref(),
            )
            .await?;
        registered += 1;
    }

    info!(agent_id = %id, registered, "miners registered");
    Ok(Json(json!({ "registered": registered })))
}

// =========================================================================
// Command inspection
// =========================================================================

/// `GET /agents/{id}/commands`
pub async fn list_commands(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Command>>, ApiError> {
    state.db.get_agent(&id).await?;
    Ok(Json(state.db.list_commands(&id).await?))
}

/// `GET /commands/{id}`
pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Command>, ApiError> {
    Ok(Json(state.db.get_command(&id).await?))
}
