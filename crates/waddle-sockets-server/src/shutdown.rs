//! Signal-driven shutdown trigger.

use tracing::info;

/// Signal indicating why shutdown was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM: graceful stop from the service manager.
    Terminate,
    /// SIGINT / Ctrl-C: interactive stop.
    Interrupt,
}

/// Wait for SIGTERM or Ctrl-C.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
            Ok(ShutdownSignal::Terminate)
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, initiating graceful shutdown");
            Ok(ShutdownSignal::Interrupt)
        }
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, initiating graceful shutdown");
    Ok(ShutdownSignal::Interrupt)
}
