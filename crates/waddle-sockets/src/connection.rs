//! Per-connection state held by the registry.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{MutexGuard, TryLockError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::channel::DuplexEndpoint;
use crate::error::DisposeError;
use crate::message::Message;

/// Opaque identifier of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random identifier.
    // TODO: sign these with an HMAC key so clients cannot guess or forge ids.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Liveness status of a connection.
///
/// `Active` and `Inactive` are driven by the owning transport. `Disposed` is
/// terminal and only entered when the manager releases the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// A transport is currently serving the connection
    Active = 0,
    /// No transport is attached; the connection ages towards eviction
    Inactive = 1,
    /// Resources have been released
    Disposed = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Inactive,
            _ => Self::Disposed,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Active => write!(f, "active"),
            ConnectionStatus::Inactive => write!(f, "inactive"),
            ConnectionStatus::Disposed => write!(f, "disposed"),
        }
    }
}

/// State of one logical connection.
///
/// Created by [`ConnectionManager::create_connection`](crate::ConnectionManager::create_connection)
/// and shared as an `Arc` between the registry, the transport and the
/// application. The transport talks through [`transport`](Self::transport),
/// the application through [`application`](Self::application).
pub struct ConnectionState {
    id: ConnectionId,
    status: AtomicU8,
    last_seen: Mutex<Instant>,
    created_at: DateTime<Utc>,
    application: DuplexEndpoint<Message>,
    transport: DuplexEndpoint<Message>,
    /// Serializes disposal-adjacent access to this connection.
    guard: tokio::sync::Mutex<()>,
    /// Tasks pumping this connection, awaited on disposal.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionState {
    /// Create a new, inactive connection around a duplex pair.
    pub fn new(
        id: ConnectionId,
        application: DuplexEndpoint<Message>,
        transport: DuplexEndpoint<Message>,
    ) -> Self {
        Self {
            id,
            status: AtomicU8::new(ConnectionStatus::Inactive as u8),
            last_seen: Mutex::new(Instant::now()),
            created_at: Utc::now(),
            application,
            transport,
            guard: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current liveness status.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Whether the connection has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.status() == ConnectionStatus::Disposed
    }

    /// Record that a transport is serving this connection.
    ///
    /// Returns `false` if the connection was already disposed.
    pub fn mark_active(&self) -> bool {
        self.transition(ConnectionStatus::Active)
    }

    /// Record that the transport detached; the connection starts ageing.
    ///
    /// Returns `false` if the connection was already disposed.
    pub fn mark_inactive(&self) -> bool {
        self.transition(ConnectionStatus::Inactive)
    }

    fn transition(&self, to: ConnectionStatus) -> bool {
        let updated = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionStatus::Disposed as u8).then_some(to as u8)
            })
            .is_ok();
        if updated {
            *self.last_seen.lock() = Instant::now();
        }
        updated
    }

    /// When the transport last reported activity.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// How long the connection has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    /// Whether the connection is inactive and idle for longer than `timeout`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.status() == ConnectionStatus::Inactive && self.idle_for(now) > timeout
    }

    /// Wall-clock creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The application-facing endpoint.
    pub fn application(&self) -> &DuplexEndpoint<Message> {
        &self.application
    }

    /// The transport-facing endpoint.
    pub fn transport(&self) -> &DuplexEndpoint<Message> {
        &self.transport
    }

    /// Acquire the connection's guard.
    ///
    /// Disposal takes the same guard, so a holder observes a stable status.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().await
    }

    /// Try to acquire the connection's guard without waiting.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, ()>, TryLockError> {
        self.guard.try_lock()
    }

    /// Attach a task that pumps this connection.
    ///
    /// Disposal closes both endpoints and then waits for every attached task.
    /// A task attached after disposal is aborted immediately.
    pub fn attach_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if self.is_disposed() {
            task.abort();
            return;
        }
        tasks.push(task);
    }

    /// Mark the connection disposed and close both endpoints.
    ///
    /// Taking the guard as an argument keeps guard holders from seeing the
    /// status change under them. Returns the attached tasks for the call that
    /// performed the release, or `None` if the connection was already disposed.
    pub(crate) fn release(&self, _guard: &MutexGuard<'_, ()>) -> Option<Vec<JoinHandle<()>>> {
        let previous = self
            .status
            .swap(ConnectionStatus::Disposed as u8, Ordering::AcqRel);
        if previous == ConnectionStatus::Disposed as u8 {
            return None;
        }

        self.transport.close();
        self.application.close();
        let tasks = std::mem::take(&mut *self.tasks.lock());

        debug!(connection_id = %self.id, tasks = tasks.len(), "Released connection");
        Some(tasks)
    }
}

/// Wait for the tasks handed back by [`ConnectionState::release`].
///
/// Every task is awaited even if an earlier one failed.
pub(crate) async fn join_tasks(tasks: Vec<JoinHandle<()>>) -> Result<(), DisposeError> {
    let mut result = Ok(());
    for task in tasks {
        if let Err(e) = task.await {
            result = Err(DisposeError::TaskFailed(e));
        }
    }
    result
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::create_pair;

    fn make_state() -> ConnectionState {
        let (transport, application) = create_pair();
        ConnectionState::new(ConnectionId::generate(), application, transport)
    }

    async fn dispose(state: &ConnectionState) -> Result<bool, DisposeError> {
        let tasks = {
            let guard = state.lock().await;
            state.release(&guard)
        };
        match tasks {
            Some(tasks) => join_tasks(tasks).await.map(|()| true),
            None => Ok(false),
        }
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| ConnectionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_connection_id_borrows_as_str() {
        let id = ConnectionId::from("abc");
        let as_str: &str = id.borrow();
        assert_eq!(as_str, "abc");
        assert_eq!(id.to_string(), "abc");
    }

    #[tokio::test]
    async fn test_new_state_is_inactive() {
        let state = make_state();
        assert_eq!(state.status(), ConnectionStatus::Inactive);
        assert!(!state.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_active_refreshes_last_seen() {
        let state = make_state();
        let created = state.last_seen();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(state.mark_active());

        assert_eq!(state.status(), ConnectionStatus::Active);
        assert_eq!(state.last_seen() - created, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_expired_requires_inactive_and_idle() {
        let state = make_state();
        let timeout = Duration::from_secs(5);

        assert!(!state.is_expired(Instant::now(), timeout));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(state.is_expired(Instant::now(), timeout));

        state.mark_active();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!state.is_expired(Instant::now(), timeout));
    }

    #[tokio::test]
    async fn test_dispose_closes_both_endpoints() {
        let state = make_state();

        assert!(dispose(&state).await.unwrap());
        assert!(state.is_disposed());
        assert!(state.transport().is_closed());
        assert!(state.application().is_closed());
    }

    #[tokio::test]
    async fn test_release_hands_back_attached_tasks_once() {
        let state = make_state();
        state.attach_task(tokio::spawn(async {}));

        let guard = state.lock().await;
        let tasks = state.release(&guard).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(state.release(&guard).is_none());
        drop(guard);

        assert!(join_tasks(tasks).await.is_ok());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let state = make_state();

        assert!(dispose(&state).await.unwrap());
        assert!(!dispose(&state).await.unwrap());
    }

    #[tokio::test]
    async fn test_disposed_is_terminal() {
        let state = make_state();
        dispose(&state).await.unwrap();

        assert!(!state.mark_active());
        assert!(!state.mark_inactive());
        assert_eq!(state.status(), ConnectionStatus::Disposed);
    }

    #[tokio::test]
    async fn test_dispose_waits_for_attached_tasks() {
        let state = std::sync::Arc::new(make_state());

        let pump = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move {
                while let Some(msg) = state.application().receive().await {
                    let _ = state.application().send(msg);
                }
            })
        };
        state.attach_task(pump);

        state.transport().send(Message::text("echo")).unwrap();
        assert_eq!(
            state.transport().receive().await.unwrap().as_text(),
            Some("echo")
        );

        assert!(dispose(&state).await.unwrap());
    }

    #[tokio::test]
    async fn test_dispose_reports_failed_task() {
        let state = make_state();

        let task = tokio::spawn(async {
            panic!("transport blew up");
        });
        state.attach_task(task);

        let result = dispose(&state).await;
        assert!(matches!(result, Err(DisposeError::TaskFailed(_))));
        assert!(state.is_disposed());
    }

    #[tokio::test]
    async fn test_attach_after_dispose_aborts_task() {
        let state = make_state();
        dispose(&state).await.unwrap();

        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        state.attach_task(task);

        // The sender is dropped with the aborted task.
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_guard_blocks_dispose() {
        let state = std::sync::Arc::new(make_state());
        let guard = state.lock().await;

        let disposer = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { dispose(&state).await })
        };

        tokio::task::yield_now().await;
        assert!(!state.is_disposed());
        assert!(state.try_lock().is_err());

        drop(guard);
        assert!(disposer.await.unwrap().unwrap());
        assert!(state.is_disposed());
    }
}
