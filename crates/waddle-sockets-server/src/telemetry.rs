//! Logging setup for the host process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize console logging.
///
/// `RUST_LOG` takes precedence over `level`. At `info` the waddle crates log
/// at `debug`.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!(level, "Telemetry initialized");

    Ok(())
}

fn default_directives(level: &str) -> String {
    if level == "info" {
        "info,waddle_sockets=debug,waddle_sockets_server=debug".to_string()
    } else {
        level.to_string()
    }
}

/// Log the final telemetry line before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives("info"),
            "info,waddle_sockets=debug,waddle_sockets_server=debug"
        );
        assert_eq!(default_directives("warn"), "warn");
    }
}
