//! Periodic eviction of inactive connections.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::ConnectionManager;
use crate::connection::ConnectionState;
use crate::metrics::CloseReason;

impl ConnectionManager {
    /// Start the background inactivity scanner.
    ///
    /// The task holds only a weak reference, so it stops on its own when the
    /// manager is dropped. Calling this again, or after shutdown, does nothing.
    pub fn start_scanning(self: &Arc<Self>) {
        let mut scanner = self.scanner.lock();
        if scanner.is_some() || self.is_shutting_down() {
            return;
        }

        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            inactivity_timeout_ms = self.config.inactivity_timeout.as_millis() as u64,
            "Starting connection scanner"
        );

        *scanner = Some(tokio::spawn(run_scanner(
            Arc::downgrade(self),
            self.config.scan_interval,
            self.shutdown.clone(),
        )));
    }

    /// Whether the background scanner is running.
    pub fn is_scanning(&self) -> bool {
        self.scanner
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one eviction pass.
    ///
    /// Every connection that is inactive and idle for longer than the
    /// inactivity timeout is removed and released. A connection whose guard is
    /// held elsewhere still leaves the map; its endpoints close once the guard
    /// is free. Returns the number of connections evicted.
    #[instrument(skip(self), name = "sockets.manager.scan")]
    pub fn scan(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.inactivity_timeout;

        // Collect first: removing while iterating would deadlock on the shard lock.
        let expired: Vec<Arc<ConnectionState>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_expired(now, timeout))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let evicted = expired
            .iter()
            .filter(|state| self.try_evict(state, now, timeout))
            .count();

        if evicted > 0 {
            info!(evicted, "Evicted inactive connections");
        }

        evicted
    }

    fn try_evict(&self, state: &Arc<ConnectionState>, now: Instant, timeout: Duration) -> bool {
        // The transport may have reattached since the snapshot was taken.
        let removed = self.connections.remove_if(state.id().as_str(), |_, current| {
            Arc::ptr_eq(current, state) && current.is_expired(now, timeout)
        });

        match removed {
            Some((_, state)) => {
                self.metrics.record_closed(CloseReason::Evicted);
                debug!(
                    connection_id = %state.id(),
                    idle_ms = state.idle_for(now).as_millis() as u64,
                    "Evicting inactive connection"
                );
                self.dispose_in_background(state);
                true
            }
            None => false,
        }
    }
}

/// Scanner loop: one [`ConnectionManager::scan`] per tick until shutdown.
async fn run_scanner(
    manager: Weak<ConnectionManager>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.scan();
            }
        }
    }

    debug!("Connection scanner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionManagerConfig;
    use crate::connection::ConnectionStatus;

    fn make_manager() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(ConnectionManagerConfig::default()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_evicts_expired_inactive() {
        let manager = make_manager();
        let state = manager.create_connection().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(manager.scan(), 1);

        assert!(manager.try_get_connection(state.id().as_str()).is_none());
        assert!(manager.close_connections().await);
        assert!(state.is_disposed());
        assert_eq!(manager.metrics().snapshot().evicted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_keeps_young_connections() {
        let manager = make_manager();
        let state = manager.create_connection().unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(manager.scan(), 0);
        assert!(manager.contains(state.id().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_is_exclusive() {
        let manager = make_manager();
        let state = manager.create_connection().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(manager.scan(), 0);
        assert!(manager.contains(state.id().as_str()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(manager.scan(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_keeps_active_connections() {
        let manager = make_manager();
        let state = manager.create_connection().unwrap();
        state.mark_active();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(manager.scan(), 0);
        assert_eq!(state.status(), ConnectionStatus::Active);
        assert!(manager.contains(state.id().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_restarts_timeout_after_mark_inactive() {
        let manager = make_manager();
        let state = manager.create_connection().unwrap();
        state.mark_active();

        tokio::time::advance(Duration::from_secs(60)).await;
        state.mark_inactive();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(manager.scan(), 0);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(manager.scan(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_evicts_busy_connection() {
        let manager = make_manager();
        let busy = manager.create_connection().unwrap();
        let idle = manager.create_connection().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let guard = busy.lock().await;
        assert_eq!(manager.scan(), 2);
        assert!(!manager.contains(busy.id().as_str()));
        assert!(!manager.contains(idle.id().as_str()));
        assert!(idle.transport().is_closed());

        // Released only once the holder lets go.
        assert_eq!(busy.status(), ConnectionStatus::Inactive);
        assert!(!busy.transport().is_closed());

        drop(guard);
        assert!(manager.close_connections().await);
        assert!(busy.is_disposed());
        assert!(busy.transport().is_closed());
        assert_eq!(busy.application().receive().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_survives_failed_disposal() {
        let manager = make_manager();
        let failing = manager.create_connection().unwrap();
        failing.attach_task(tokio::spawn(async {
            panic!("transport task crashed");
        }));
        let healthy = manager.create_connection().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(manager.scan(), 2);

        assert!(manager.close_connections().await);
        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.dispose_failures, 1);
        assert_eq!(snapshot.disposed, 2);
        assert!(failing.is_disposed());
        assert!(healthy.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_scanner_evicts() {
        let manager = make_manager();
        manager.start_scanning();
        manager.start_scanning();
        assert!(manager.is_scanning());

        let state = manager.create_connection().unwrap();

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(manager.try_get_connection(state.id().as_str()).is_none());

        manager.close_connections().await;
        assert!(!manager.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_stops_when_manager_dropped() {
        let manager = make_manager();
        manager.start_scanning();
        let handle = manager.scanner.lock().take().unwrap();

        drop(manager);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scanner should stop")
            .unwrap();
    }
}
