use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use waddle_sockets::ConnectionManager;

mod config;
mod shutdown;
mod telemetry;

/// Interval between connection statistics log lines.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "waddle-sockets-server", version, about = "Waddle socket connection host")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut server_config = config::load_config(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
        config::validate(&server_config)?;
    }

    telemetry::init(&server_config.logging.level)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Waddle Sockets Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let manager_config = server_config.connections.to_manager_config();
    manager_config.log_config();

    let manager = Arc::new(ConnectionManager::new(manager_config)?);
    manager.start_scanning();

    let signal = run_until_signal(&manager).await?;
    info!(?signal, "Closing connections");

    let clean = manager.close_connections().await;
    if !clean {
        warn!(
            pending_disposals = manager.pending_disposals(),
            "Exiting with connections still disposing"
        );
    }

    let stats = manager.metrics().snapshot();
    info!(
        created = stats.created,
        removed = stats.removed,
        evicted = stats.evicted,
        drained = stats.drained,
        dispose_failures = stats.dispose_failures,
        "Connection manager stopped"
    );

    telemetry::shutdown();

    Ok(())
}

/// Log connection statistics periodically until a shutdown signal arrives.
async fn run_until_signal(manager: &ConnectionManager) -> Result<shutdown::ShutdownSignal> {
    let mut stats = tokio::time::interval(STATS_INTERVAL);
    stats.tick().await;

    let signal = shutdown::wait_for_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            result = &mut signal => return Ok(result?),
            _ = stats.tick() => {
                info!(
                    connections = manager.connection_count(),
                    pending_disposals = manager.pending_disposals(),
                    "Connection statistics"
                );
            }
        }
    }
}
