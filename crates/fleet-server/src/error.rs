//! Fleet server error types.

use fleet_core::db::DatabaseError;
use thiserror::Error;

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors surfaced by fleet operations.
///
/// "Agent offline" is deliberately absent: offline is an expected condition
/// and is reported as the `queued` dispatch outcome, never as an error.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for FleetError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Database(other),
        }
    }
}
