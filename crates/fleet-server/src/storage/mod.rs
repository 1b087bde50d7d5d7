//! SQLite storage for the fleet server: farms, agents, miners, commands,
//! and enrollment tokens.

mod db;
mod models;
mod queries;
mod queries_commands;
mod queries_enrollment;

#[cfg(test)]
mod tests;

pub use db::FleetDatabase;
pub use fleet_core::db::DatabaseError;
pub use models::{
    Agent, Command, CommandKind, CommandStatus, EnrollmentToken, Farm, Miner, MinerConfigUpdate,
};
