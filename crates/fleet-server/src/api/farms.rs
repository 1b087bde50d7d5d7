//! Farm CRUD handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::error::FleetError;
use crate::storage::Farm;

#[derive(Debug, Deserialize)]
pub struct FarmRequest {
    name: String,
}

fn validated_name(raw: &str) -> Result<&str, FleetError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(FleetError::InvalidArgument(
            "farm name must not be empty".into(),
        ));
    }
    Ok(name)
}

/// `POST /farms`
pub async fn create_farm(
    State(state): State<AppState>,
    Json(request): Json<FarmRequest>,
) -> Result<(StatusCode, Json<Farm>), ApiError> {
    let name = validated_name(&request.name)?;
    let id = Uuid::new_v4().to_string();
    let farm = state.db.create_farm(&id, name).await?;

    info!(farm_id = %farm.id, name = %farm.name, "farm created");
    Ok((StatusCode::CREATED, Json(farm)))
}

/// `GET /farms`
pub async fn list_farms(State(state): State<AppState>) -> Result<Json<Vec<Farm>>, ApiError> {
    Ok(Json(state.db.list_farms().await?))
}

/// `GET /farms/{id}`
pub async fn get_farm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Farm>, ApiError> {
    Ok(Json(state.db.get_farm(&id).await?))
}

/// `PATCH /farms/{id}`
pub async fn rename_farm(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FarmRequest>,
) -> Result<Json<Farm>, ApiError> {
    let name = validated_name(&request.name)?;
    Ok(Json(state.db.rename_farm(&id, name).await?))
}

/// `DELETE /farms/{id}` - removes the farm and, via cascade, its agent,
/// miners, queued commands, and enrollment tokens. Any open agent session
/// notices the missing row on its next message and shuts down.
pub async fn delete_farm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let agent = state.db.agent_for_farm(&id).await?;

    if !state.db.delete_farm(&id).await? {
        return Err(FleetError::NotFound(format!("Farm {id}")).into());
    }

    if let Some(agent) = agent {
        state.registry.remove(&agent.id).await;
    }

    info!(farm_id = %id, "farm deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
