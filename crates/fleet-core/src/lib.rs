//! Minefleet Core Library
//!
//! Shared functionality for Minefleet components:
//! - Configuration resolution (defaults + settings file)
//! - SQLite pool helpers and shared database error type
//! - Tracing/logging initialisation
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
