//! HTTP fleet API: farms, agents, miners, commands, and the agent
//! WebSocket endpoint.

mod agents;
mod error;
mod farms;
mod miners;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::enrollment::EnrollmentService;
use crate::presence::PresenceTracker;
use crate::queue::CommandDispatcher;
use crate::registry::ConnectionRegistry;
use crate::session;
use crate::storage::FleetDatabase;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: FleetDatabase,
    pub registry: ConnectionRegistry,
    pub dispatcher: CommandDispatcher,
    pub presence: PresenceTracker,
    pub enrollment: EnrollmentService,
    /// Externally reachable base URL, used in install scripts.
    pub public_url: String,
}

/// Build the full fleet router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/farms", post(farms::create_farm).get(farms::list_farms))
        .route(
            "/farms/{id}",
            get(farms::get_farm)
                .patch(farms::rename_farm)
                .delete(farms::delete_farm),
        )
        .route("/farms/{id}/agents", post(agents::issue_enrollment))
        .route("/agents", get(agents::list_agents))
        .route("/agents/install", get(agents::install_script))
        .route("/agents/ws", get(session::agent_ws))
        .route("/agents/{id}", get(agents::get_agent))
        .route("/agents/{id}/scan", post(agents::scan))
        .route(
            "/agents/{id}/miners/register",
            post(agents::register_miners),
        )
        .route("/agents/{id}/commands", get(agents::list_commands))
        .route("/commands/{id}", get(agents::get_command))
        .route("/miners", get(miners::list_miners))
        .route(
            "/miners/{id}",
            get(miners::get_miner).patch(miners::update_miner),
        )
        .route("/miners/{id}/restart", post(miners::restart_miner))
        .route("/miners/{id}/power_off", post(miners::power_off_miner))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
