//! # waddle-sockets
//!
//! Connection registry and liveness lifecycle for Waddle's socket transports.
//!
//! Every logical connection couples a transport-facing endpoint (WebSocket,
//! server-sent events, long polling) with an application-facing endpoint
//! through an in-memory duplex channel. This crate owns the part in between:
//!
//! - **Channel**: cross-wired unbounded queues forming the duplex pipe
//! - **Connection**: per-connection identity, status, last activity and guard
//! - **Manager**: the concurrent registry, the periodic inactivity scan and the
//!   bounded shutdown drain
//!
//! Transports, message framing and cross-server fan-out live elsewhere.

pub mod channel;
pub mod config;
pub mod connection;
pub mod manager;
pub mod message;
pub mod metrics;

mod error;

pub use channel::{create_pair, DuplexEndpoint};
pub use config::ConnectionManagerConfig;
pub use connection::{ConnectionId, ConnectionState, ConnectionStatus};
pub use error::{ChannelError, DisposeError, SocketsError};
pub use manager::ConnectionManager;
pub use message::{Message, MessageFormat};
pub use metrics::{ConnectionManagerMetrics, MetricsSnapshot};
