//! Connection lifecycle metrics.
//!
//! Instruments come from the global OpenTelemetry meter provider, which the
//! host application is expected to install. Without a provider they are
//! no-ops. [`ConnectionManagerMetrics`] keeps process-local counters alongside
//! for diagnostics and tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("waddle-sockets"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for connections created.
pub fn connections_created() -> Counter<u64> {
    meter()
        .u64_counter("sockets.connections.created")
        .with_description("Total connections created")
        .with_unit("connection")
        .build()
}

/// Counter for connections leaving the registry, by reason.
pub fn connections_closed() -> Counter<u64> {
    meter()
        .u64_counter("sockets.connections.closed")
        .with_description("Total connections removed from the registry")
        .with_unit("connection")
        .build()
}

/// Counter for completed disposals.
pub fn connections_disposed() -> Counter<u64> {
    meter()
        .u64_counter("sockets.connections.disposed")
        .with_description("Total connections whose resources were released")
        .with_unit("connection")
        .build()
}

/// Counter for failed disposals.
pub fn dispose_failures() -> Counter<u64> {
    meter()
        .u64_counter("sockets.connections.dispose_failures")
        .with_description("Total disposals that reported a failure")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("sockets.connections.active")
        .with_description("Current number of registered connections")
        .with_unit("connection")
        .build()
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit `remove_connection`
    Removed,
    /// Evicted by the inactivity scan
    Evicted,
    /// Drained by `close_connections`
    Shutdown,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Removed => "removed",
            CloseReason::Evicted => "evicted",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Process-local lifecycle counters for one manager.
#[derive(Debug, Default)]
pub struct ConnectionManagerMetrics {
    /// Connections created
    pub created: AtomicU64,
    /// Connections removed explicitly
    pub removed: AtomicU64,
    /// Connections evicted by the scanner
    pub evicted: AtomicU64,
    /// Connections drained at shutdown
    pub drained: AtomicU64,
    /// Disposals that released resources
    pub disposed: AtomicU64,
    /// Disposals that reported a failure
    pub dispose_failures: AtomicU64,
    /// Currently registered connections
    pub active: AtomicI64,
}

impl ConnectionManagerMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection entering the registry.
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        connections_created().add(1, &[]);
        connections_active().record(active, &[]);
    }

    /// Record a connection leaving the registry.
    pub fn record_closed(&self, reason: CloseReason) {
        let counter = match reason {
            CloseReason::Removed => &self.removed,
            CloseReason::Evicted => &self.evicted,
            CloseReason::Shutdown => &self.drained,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        connections_closed().add(1, &[KeyValue::new("reason", reason.as_str())]);
        connections_active().record(active, &[]);
    }

    /// Record a disposal that released resources.
    pub fn record_disposed(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
        connections_disposed().add(1, &[]);
    }

    /// Record a disposal failure.
    pub fn record_dispose_failure(&self) {
        self.dispose_failures.fetch_add(1, Ordering::Relaxed);
        dispose_failures().add(1, &[]);
    }

    /// Take a point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            disposed: self.disposed.load(Ordering::Relaxed),
            dispose_failures: self.dispose_failures.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`ConnectionManagerMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub removed: u64,
    pub evicted: u64,
    pub drained: u64,
    pub disposed: u64,
    pub dispose_failures: u64,
    pub active: i64,
}
