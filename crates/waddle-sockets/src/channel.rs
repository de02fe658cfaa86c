//! Duplex channel pair linking a transport to its application handler.
//!
//! Two unbounded `mpsc` queues are cross-wired so that whatever one endpoint
//! sends surfaces on the other endpoint's `receive`:
//!
//! ```text
//!   transport endpoint                      application endpoint
//!   send ──────────► transport→application ──────────► receive
//!   receive ◄─────── application→transport ◄────────── send
//! ```

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

/// Create a cross-wired pair of endpoints.
///
/// Items sent on the first endpoint are received on the second, and vice
/// versa. Buffering is unbounded in both directions.
pub fn create_pair<T>() -> (DuplexEndpoint<T>, DuplexEndpoint<T>) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
    let a_closed = CancellationToken::new();
    let b_closed = CancellationToken::new();

    (
        DuplexEndpoint::new(a_to_b_tx, b_to_a_rx, a_closed.clone(), b_closed.clone()),
        DuplexEndpoint::new(b_to_a_tx, a_to_b_rx, b_closed, a_closed),
    )
}

/// One side of a duplex channel pair.
///
/// All operations take `&self` so an endpoint can be shared behind an `Arc`
/// between the task that writes and the task that reads.
pub struct DuplexEndpoint<T> {
    /// Sender into the peer's inbound queue. `None` once closed.
    outbound: Mutex<Option<mpsc::UnboundedSender<T>>>,
    /// Receiver of the peer's outbound queue.
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>,
    /// Cancelled when this endpoint is closed.
    closed: CancellationToken,
    /// The peer's `closed` token.
    peer_closed: CancellationToken,
}

impl<T> DuplexEndpoint<T> {
    fn new(
        outbound: mpsc::UnboundedSender<T>,
        inbound: mpsc::UnboundedReceiver<T>,
        closed: CancellationToken,
        peer_closed: CancellationToken,
    ) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            closed,
            peer_closed,
        }
    }

    /// Queue an item for the peer. Never blocks.
    pub fn send(&self, item: T) -> Result<(), ChannelError> {
        // The peer's queue stays open while an abandoned receive holds its lock.
        if self.peer_closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }

        match self.outbound.lock().as_ref() {
            Some(sender) => sender.send(item).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    /// Wait for the next item from the peer.
    ///
    /// Returns `None` once the stream has ended: either the peer closed and
    /// everything it sent before closing has been drained, or this endpoint
    /// itself was closed.
    pub async fn receive(&self) -> Option<T> {
        let mut inbound = tokio::select! {
            biased;
            () = self.closed.cancelled() => return None,
            guard = self.inbound.lock() => guard,
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => {
                inbound.close();
                None
            }
            item = inbound.recv() => item,
        }
    }

    /// Close this endpoint.
    ///
    /// The peer observes end-of-stream after draining what was already sent.
    /// Pending receives on this endpoint return `None` and the peer's further
    /// sends fail. Closing twice is a no-op.
    pub fn close(&self) {
        self.outbound.lock().take();
        self.closed.cancel();

        // A receiver currently holding the lock closes the queue itself.
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.close();
        }
    }

    /// Whether [`close`](Self::close) has been called on this endpoint.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl<T> fmt::Debug for DuplexEndpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexEndpoint")
            .field("closed", &self.is_closed())
            .finish()
    }
}
