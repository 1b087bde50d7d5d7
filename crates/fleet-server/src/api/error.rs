//! HTTP mapping for fleet errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::FleetError;

/// Wrapper turning a `FleetError` into an HTTP response.
#[derive(Debug)]
pub struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        Self(e)
    }
}

impl From<fleet_core::db::DatabaseError> for ApiError {
    fn from(e: fleet_core::db::DatabaseError) -> Self {
        Self(FleetError::from(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            FleetError::NotFound(what) => (StatusCode::NOT_FOUND, what.clone()),
            FleetError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            FleetError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            FleetError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            FleetError::Database(err) => {
                // Internal detail stays in the log, not the response body.
                error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
