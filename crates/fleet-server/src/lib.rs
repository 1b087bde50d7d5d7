//! Minefleet Fleet Server Library
//!
//! Core functionality for the fleet server:
//! - SQLite storage for farms, agents, miners, commands, and enrollment tokens
//! - Presence tracking from agent heartbeats
//! - Durable per-agent command queue with ordered, at-most-one-in-flight delivery
//! - WebSocket agent sessions and the in-memory connection registry
//! - Single-use enrollment tokens and the HTTP fleet API

pub mod api;
pub mod enrollment;
pub mod error;
pub mod presence;
pub mod queue;
pub mod registry;
pub mod session;
pub mod storage;
pub mod wire;
