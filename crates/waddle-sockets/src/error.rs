//! Error types for the connection lifecycle.

use thiserror::Error;

/// Errors returned by the connection manager.
#[derive(Debug, Error)]
pub enum SocketsError {
    /// The manager has started closing its connections
    #[error("Connection manager is shutting down")]
    ShuttingDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SocketsError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Errors returned by a duplex endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Either this endpoint or its peer has been closed
    #[error("Channel is closed")]
    Closed,
}

/// Failure while releasing a connection's resources.
///
/// These are logged and counted by the manager, never handed back to the
/// caller that triggered the disposal.
#[derive(Debug, Error)]
pub enum DisposeError {
    /// A task attached to the connection panicked or was cancelled
    #[error("Connection task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SocketsError::ShuttingDown.to_string(),
            "Connection manager is shutting down"
        );
        assert_eq!(
            SocketsError::config("scan_interval must be non-zero").to_string(),
            "Configuration error: scan_interval must be non-zero"
        );
        assert_eq!(ChannelError::Closed.to_string(), "Channel is closed");
    }

    #[tokio::test]
    async fn test_dispose_error_from_join_error() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let join_error = handle.await.unwrap_err();

        let err = DisposeError::from(join_error);
        assert!(err.to_string().starts_with("Connection task failed"));
    }
}
