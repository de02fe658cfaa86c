//! Connection registry with liveness scanning and coordinated shutdown.
//!
//! ## Architecture
//!
//! ```text
//!  transport ──create_connection──►  ConnectionManager  ◄──try_get_connection── application
//!                                           │
//!                          DashMap<ConnectionId, Arc<ConnectionState>>
//!                                           │
//!              ┌────────────────────────────┼─────────────────────────────┐
//!       remove_connection              scanner (interval)           close_connections
//!              └─────────────► TaskTracker of disposals ◄─────────────────┘
//! ```
//!
//! A connection leaves the map through exactly one of the three paths: the
//! map removal is atomic, and whichever path wins releases the connection.
//! Waiting on a released connection's attached tasks happens on tracked tasks
//! so shutdown can wait for them.

mod scanner;
mod shutdown;

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::channel::create_pair;
use crate::config::ConnectionManagerConfig;
use crate::connection::{join_tasks, ConnectionId, ConnectionState};
use crate::error::SocketsError;
use crate::metrics::{CloseReason, ConnectionManagerMetrics};

/// Registry of live connections.
///
/// Construct one per server and share it as `Arc<ConnectionManager>` with
/// every transport and application handler that needs it.
///
/// Operations that schedule a disposal (`remove_connection`, `scan`,
/// `close_connections`, and `create_connection` racing a shutdown) must be
/// called from within a Tokio runtime.
///
/// ## Usage
///
/// ```ignore
/// let manager = Arc::new(ConnectionManager::new(ConnectionManagerConfig::default())?);
/// manager.start_scanning();
///
/// // Transport side:
/// let connection = manager.create_connection()?;
/// connection.transport().send(Message::text("hello"))?;
///
/// // Application side, by id:
/// if let Some(connection) = manager.try_get_connection(id) {
///     let msg = connection.application().receive().await;
/// }
///
/// // Process shutdown:
/// manager.close_connections().await;
/// ```
pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    connections: DashMap<ConnectionId, Arc<ConnectionState>>,
    /// Disposals scheduled by any of the removal paths.
    disposals: TaskTracker,
    disposal_permits: Arc<Semaphore>,
    /// Cancelled once `close_connections` starts.
    shutdown: CancellationToken,
    scanner: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<ConnectionManagerMetrics>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// The inactivity scanner is not started until [`start_scanning`](Self::start_scanning).
    pub fn new(config: ConnectionManagerConfig) -> Result<Self, SocketsError> {
        config.validate()?;
        info!("Creating connection manager");

        Ok(Self {
            disposal_permits: Arc::new(Semaphore::new(config.max_concurrent_disposals)),
            config,
            connections: DashMap::new(),
            disposals: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            scanner: Mutex::new(None),
            metrics: Arc::new(ConnectionManagerMetrics::new()),
        })
    }

    /// Create and register a new connection.
    ///
    /// The returned state carries both endpoints: the transport that asked
    /// for the connection keeps [`transport`](ConnectionState::transport),
    /// while the application finds the connection later by id.
    #[instrument(skip(self), name = "sockets.manager.create_connection")]
    pub fn create_connection(&self) -> Result<Arc<ConnectionState>, SocketsError> {
        if self.is_shutting_down() {
            return Err(SocketsError::ShuttingDown);
        }

        let state = loop {
            let id = ConnectionId::generate();
            if let Entry::Vacant(slot) = self.connections.entry(id) {
                let (transport, application) = create_pair();
                let state = Arc::new(ConnectionState::new(
                    slot.key().clone(),
                    application,
                    transport,
                ));
                slot.insert(Arc::clone(&state));
                break state;
            }
        };
        self.metrics.record_created();

        // A drain that started after the check above may have missed this entry.
        if self.is_shutting_down() {
            if self.take_if_same(&state).is_some() {
                self.metrics.record_closed(CloseReason::Shutdown);
                self.dispose_in_background(Arc::clone(&state));
            }
            return Err(SocketsError::ShuttingDown);
        }

        debug!(connection_id = %state.id(), "Created connection");
        Ok(state)
    }

    /// Look up a connection by id.
    ///
    /// Does not count as activity.
    pub fn try_get_connection(&self, id: &str) -> Option<Arc<ConnectionState>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a connection and release its resources in the background.
    ///
    /// Returns `true` if this call removed the connection. Removing an
    /// unknown id is a no-op.
    #[instrument(skip(self), name = "sockets.manager.remove_connection", fields(connection_id = %id))]
    pub fn remove_connection(&self, id: &str) -> bool {
        match self.connections.remove(id) {
            Some((_, state)) => {
                self.metrics.record_closed(CloseReason::Removed);
                debug!("Removed connection");
                self.dispose_in_background(state);
                true
            }
            None => {
                debug!("Connection was not registered");
                false
            }
        }
    }

    /// Record transport activity for a connection.
    ///
    /// Returns true if the connection was found and updated.
    pub fn mark_active(&self, id: &str) -> bool {
        self.try_get_connection(id)
            .is_some_and(|state| state.mark_active())
    }

    /// Record that the transport detached from a connection.
    ///
    /// Returns true if the connection was found and updated.
    pub fn mark_inactive(&self, id: &str) -> bool {
        self.try_get_connection(id)
            .is_some_and(|state| state.mark_inactive())
    }

    /// Whether an id is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Get the number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all registered connection ids.
    ///
    /// Useful for debugging and monitoring.
    pub fn list_connections(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of disposals that have been scheduled but not finished.
    pub fn pending_disposals(&self) -> usize {
        self.disposals.len()
    }

    /// Whether `close_connections` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// The manager's configuration.
    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    /// Lifecycle counters.
    pub fn metrics(&self) -> &Arc<ConnectionManagerMetrics> {
        &self.metrics
    }

    /// Remove `state` from the map only if it is still the registered value.
    fn take_if_same(&self, state: &Arc<ConnectionState>) -> Option<Arc<ConnectionState>> {
        self.connections
            .remove_if(state.id().as_str(), |_, current| Arc::ptr_eq(current, state))
            .map(|(_, removed)| removed)
    }

    /// Dispose a connection that has already left the map.
    ///
    /// Both endpoints close before this returns unless a collaborator holds
    /// the guard, in which case they close as soon as it is released. Only
    /// the wait on attached tasks takes a disposal permit.
    fn dispose_in_background(&self, state: Arc<ConnectionState>) {
        let released = match state.try_lock() {
            Ok(guard) => Some(state.release(&guard)),
            Err(_) => None,
        };

        match released {
            Some(Some(tasks)) => {
                self.metrics.record_disposed();
                if !tasks.is_empty() {
                    self.disposals.spawn(join_released(
                        state.id().clone(),
                        tasks,
                        Arc::clone(&self.disposal_permits),
                        Arc::clone(&self.metrics),
                    ));
                }
            }
            Some(None) => {
                debug!(connection_id = %state.id(), "Connection was already disposed");
            }
            None => {
                debug!(connection_id = %state.id(), "Connection busy, releasing once its guard is free");
                let permits = Arc::clone(&self.disposal_permits);
                let metrics = Arc::clone(&self.metrics);
                self.disposals.spawn(async move {
                    let released = {
                        let guard = state.lock().await;
                        state.release(&guard)
                    };
                    if let Some(tasks) = released {
                        metrics.record_disposed();
                        join_released(state.id().clone(), tasks, permits, metrics).await;
                    }
                });
            }
        }
    }
}

/// Wait for a released connection's tasks, absorbing any failure.
async fn join_released(
    id: ConnectionId,
    tasks: Vec<JoinHandle<()>>,
    permits: Arc<Semaphore>,
    metrics: Arc<ConnectionManagerMetrics>,
) {
    if tasks.is_empty() {
        return;
    }

    let _permit = permits.acquire_owned().await.ok();
    match join_tasks(tasks).await {
        Ok(()) => debug!(connection_id = %id, "Connection tasks finished"),
        Err(e) => {
            metrics.record_dispose_failure();
            warn!(connection_id = %id, error = %e, "Failed to dispose connection");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .field("pending_disposals", &self.disposals.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
