//! Bulk disposal of every connection at process shutdown.

use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::ConnectionManager;
use crate::connection::ConnectionId;
use crate::metrics::CloseReason;

impl ConnectionManager {
    /// Stop the scanner and dispose every registered connection.
    ///
    /// Waits for all outstanding disposals, including ones scheduled earlier
    /// by `remove_connection` or the scanner, until the shutdown timeout
    /// elapses. Returns `true` if everything finished in time; disposals still
    /// running at the deadline are left to finish on their own. Drained
    /// connections have their endpoints closed before the wait starts, unless
    /// a collaborator is holding their guard.
    ///
    /// New connections are refused once this has been called. Calling it
    /// again is safe.
    #[instrument(skip(self), name = "sockets.manager.close_connections")]
    pub async fn close_connections(&self) -> bool {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        self.shutdown.cancel();

        let scanner = self.scanner.lock().take();
        if let Some(handle) = scanner {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("Connection scanner did not stop before the shutdown deadline");
            }
        }

        let ids: Vec<ConnectionId> = self.connections.iter().map(|r| r.key().clone()).collect();
        let mut drained = 0usize;
        for id in ids {
            if let Some((_, state)) = self.connections.remove(&id) {
                self.metrics.record_closed(CloseReason::Shutdown);
                self.dispose_in_background(state);
                drained += 1;
            }
        }

        self.disposals.close();
        info!(
            drained,
            pending = self.disposals.len(),
            timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
            "Closing connections"
        );

        let completed = tokio::time::timeout_at(deadline, self.disposals.wait())
            .await
            .is_ok();

        if completed {
            info!("All connections disposed");
        } else {
            warn!(
                remaining = self.disposals.len(),
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Shutdown timeout expired with disposals still running"
            );
        }

        completed
    }
}
