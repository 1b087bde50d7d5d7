//! Durable per-agent command queue and delivery.

mod dispatcher;

pub use dispatcher::{CommandDispatcher, Dispatch};
