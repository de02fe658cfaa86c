//! Shared helpers for connection lifecycle integration tests.

use std::sync::Arc;
use std::time::Duration;

use waddle_sockets::{ConnectionManager, ConnectionManagerConfig};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing once per test binary.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("waddle_sockets=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Build a shared manager with the given inactivity timeout.
pub fn manager_with_timeout(inactivity_timeout: Duration) -> Arc<ConnectionManager> {
    let config = ConnectionManagerConfig {
        inactivity_timeout,
        ..Default::default()
    };
    Arc::new(ConnectionManager::new(config).expect("valid config"))
}
