//! Lifecycle policy for the connection manager.
//!
//! Hosts build this from their own configuration sources; the
//! `waddle-sockets-server` binary reads it from TOML and `WADDLE_SOCKETS_*`
//! environment variables.

use std::time::Duration;

use tracing::info;

use crate::error::SocketsError;

/// Default scan period in milliseconds.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1_000;

/// Default inactivity timeout in milliseconds.
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 5_000;

/// Default shutdown drain budget in milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Default limit on concurrent waits for attached tasks.
pub const DEFAULT_MAX_CONCURRENT_DISPOSALS: usize = 64;

/// Configuration for the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionManagerConfig {
    /// Period between inactivity scans.
    pub scan_interval: Duration,

    /// Idle age after which an inactive connection is evicted.
    pub inactivity_timeout: Duration,

    /// Upper bound on how long shutdown waits for disposals.
    pub shutdown_timeout: Duration,

    /// Maximum number of released connections whose attached tasks are
    /// awaited at the same time.
    pub max_concurrent_disposals: usize,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(DEFAULT_SCAN_INTERVAL_MS),
            inactivity_timeout: Duration::from_millis(DEFAULT_INACTIVITY_TIMEOUT_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            max_concurrent_disposals: DEFAULT_MAX_CONCURRENT_DISPOSALS,
        }
    }
}

impl ConnectionManagerConfig {
    /// Check that every policy value is usable.
    pub fn validate(&self) -> Result<(), SocketsError> {
        if self.scan_interval.is_zero() {
            return Err(SocketsError::config("scan_interval must be greater than zero"));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(SocketsError::config(
                "inactivity_timeout must be greater than zero",
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(SocketsError::config(
                "shutdown_timeout must be greater than zero",
            ));
        }
        if self.max_concurrent_disposals == 0 {
            return Err(SocketsError::config(
                "max_concurrent_disposals must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!(
            scan_interval_ms = self.scan_interval.as_millis() as u64,
            inactivity_timeout_ms = self.inactivity_timeout.as_millis() as u64,
            shutdown_timeout_ms = self.shutdown_timeout.as_millis() as u64,
            max_concurrent_disposals = self.max_concurrent_disposals,
            "Connection manager configuration"
        );
    }
}
