//! Configuration resolution for Minefleet.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. Settings file (JSON), when present
//! 3. CLI arguments (applied by the binary, highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete Minefleet server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket server.
    pub addr: String,
    /// Path to the SQLite database file. `None` means the platform default.
    pub database_path: Option<PathBuf>,
    /// Public base URL embedded in generated install scripts.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            database_path: None,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Presence tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Expected agent heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Liveness window as a multiple of the heartbeat interval. A safety
    /// multiple above 1 tolerates heartbeat jitter without flapping the
    /// reported connectivity state.
    pub liveness_multiplier: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            liveness_multiplier: 3,
        }
    }
}

impl PresenceConfig {
    /// The window after which an agent with no recorded contact is offline.
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * self.liveness_multiplier as u64)
    }
}

/// Command delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a delivered command may wait for its ack before it is
    /// marked failed and the next pending command becomes deliverable.
    pub ack_timeout_secs: u64,
    /// Interval of the background sweep that enforces the ack timeout.
    pub sweep_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}

impl DeliveryConfig {
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from a JSON settings file, falling back to
    /// defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
