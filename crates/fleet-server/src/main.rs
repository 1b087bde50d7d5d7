//! Minefleet Fleet Server
//!
//! HTTP/WebSocket server for remote mining-site agents: presence tracking,
//! durable command queues, and enrollment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use fleet_core::Config;
use fleet_server::api::{self, AppState};
use fleet_server::enrollment::EnrollmentService;
use fleet_server::presence::PresenceTracker;
use fleet_server::queue::CommandDispatcher;
use fleet_server::registry::ConnectionRegistry;
use fleet_server::storage::FleetDatabase;

#[derive(Parser, Debug)]
#[command(name = "fleet-server")]
#[command(
    version,
    about = "Minefleet fleet server - agent presence, command queue, and enrollment"
)]
struct Args {
    /// Address to listen on. Overrides the settings file.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the JSON settings file.
    #[arg(long, env = "MINEFLEET_SETTINGS", default_value = "settings.json")]
    settings: PathBuf,

    /// Public base URL embedded in install scripts.
    #[arg(long, env = "MINEFLEET_PUBLIC_URL")]
    public_url: Option<String>,

    /// Expected agent heartbeat interval in seconds.
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Seconds a delivered command may wait for its ack.
    #[arg(long)]
    ack_timeout: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    fleet_core::tracing_init::init_tracing("fleet_server=info", args.log_json);

    let mut config = Config::load(&args.settings)?;
    if let Some(addr) = args.addr {
        config.server.addr = addr.to_string();
    }
    if let Some(path) = args.db_path {
        config.server.database_path = Some(path);
    }
    if let Some(url) = args.public_url {
        config.server.public_url = url;
    }
    if let Some(secs) = args.heartbeat_interval {
        config.presence.heartbeat_interval_secs = secs;
    }
    if let Some(secs) = args.ack_timeout {
        config.delivery.ack_timeout_secs = secs;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        "Starting fleet-server"
    );

    let db = match &config.server.database_path {
        Some(path) => {
            info!(path = %path.display(), "Opening fleet database");
            FleetDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening fleet database (default path)");
            FleetDatabase::open(&default_path).await?
        }
    };

    let registry = ConnectionRegistry::new();
    let dispatcher = CommandDispatcher::new(
        db.clone(),
        registry.clone(),
        config.delivery.ack_timeout(),
    );
    let presence = PresenceTracker::new(db.clone(), config.presence.liveness_window());
    let enrollment = EnrollmentService::new(db.clone());

    // Background sweep: fail commands whose ack never arrived.
    let sweep_dispatcher = dispatcher.clone();
    let sweep_interval = config.delivery.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval.max(Duration::from_secs(1)));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            match sweep_dispatcher.sweep_overdue().await {
                Ok(failed) if failed > 0 => {
                    info!(failed, "Ack timeout sweep failed overdue commands");
                }
                Err(e) => {
                    warn!(error = %e, "Ack timeout sweep failed");
                }
                _ => {}
            }
        }
    });

    let state = AppState {
        db,
        registry,
        dispatcher,
        presence,
        enrollment,
        public_url: config.server.public_url.clone(),
    };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(addr = %config.server.addr, "Fleet server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Fleet server stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".minefleet").join("fleet.db"))
}
