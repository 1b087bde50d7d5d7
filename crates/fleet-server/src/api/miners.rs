//! Miner handlers: inventory views, pool configuration, and power control.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ApiError, AppState};
use crate::storage::{CommandKind, Miner, MinerConfigUpdate};

/// A miner as shown to operators. The device password never leaves the
/// server; only its presence is reported.
#[derive(Debug, Serialize)]
pub struct MinerView {
    #[serde(flatten)]
    pub miner: Miner,
    pub has_password: bool,
    pub web_ui_url: Option<String>,
}

impl From<Miner> for MinerView {
    fn from(miner: Miner) -> Self {
        let has_password = miner.password.is_some();
        let web_ui_url = miner.ip.as_deref().map(|ip| format!("http://{ip}"));
        Self {
            miner,
            has_password,
            web_ui_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MinerFilter {
    #[serde(default)]
    agent_id: Option<String>,
}

/// `GET /miners?agent_id=...`
pub async fn list_miners(
    State(state): State<AppState>,
    Query(filter): Query<MinerFilter>,
) -> Result<Json<Vec<MinerView>>, ApiError> {
    let miners = state.db.list_miners(filter.agent_id.as_deref()).await?;
    Ok(Json(miners.into_iter().map(MinerView::from).collect()))
}

/// `GET /miners/{id}`
pub async fn get_miner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MinerView>, ApiError> {
    Ok(Json(state.db.get_miner(&id).await?.into()))
}

/// `PATCH /miners/{id}` - update pool configuration. A store-only
/// mutation: the new workers and password reach the device inside the
/// payload of the next restart command.
pub async fn update_miner(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<MinerConfigUpdate>,
) -> Result<Json<MinerView>, ApiError> {
    let miner = state.db.update_miner_config(&id, &update).await?;
    Ok(Json(miner.into()))
}

/// `POST /miners/{id}/restart`
pub async fn restart_miner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    control_command(&state, &id, CommandKind::RestartMiner).await
}

/// `POST /miners/{id}/power_off`
pub async fn power_off_miner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    control_command(&state, &id, CommandKind::PowerOffMiner).await
}

/// Queue a power-control command for the miner's agent. Accepted means
/// queued or dispatched, never executed; the ack reports the outcome.
async fn control_command(
    state: &AppState,
    miner_id: &str,
    kind: CommandKind,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let miner = state.db.get_miner(miner_id).await?;
    let (command, outcome) = state
        .dispatcher
        .enqueue(&miner.agent_id, kind, &control_payload(&miner))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": outcome.as_str(),
            "command_id": command.id,
        })),
    ))
}

/// Everything the agent needs to reach the device, including the stored
/// password. This payload goes only to the agent, never to API clients.
fn control_payload(miner: &Miner) -> Value {
    json!({
        "miner_id": miner.id,
        "mac": miner.mac,
        "ip": miner.ip,
        "password": miner.password,
        "worker1": miner.worker1,
        "worker2": miner.worker2,
        "worker3": miner.worker3,
    })
}
