//! Outbound event transport used by the client-side components.
//!
//! Capture flushing and turn-taking transitions must never suspend between
//! reading and writing session state, so sending an event is a synchronous,
//! non-blocking operation. The actual socket write happens on a separate task
//! that drains the channel in order.

use tokio::sync::mpsc;

use crate::core::realtime::ClientEvent;

/// Returned when the transport has already been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Synchronous, ordered sink for client events.
pub trait EventTransport: Send + Sync {
    /// Whether events sent now can still reach the bridge.
    fn is_open(&self) -> bool;

    /// Queue an event for sending. Ordering between calls is preserved.
    fn send(&self, event: ClientEvent) -> Result<(), TransportClosed>;
}

impl EventTransport for mpsc::UnboundedSender<ClientEvent> {
    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn send(&self, event: ClientEvent) -> Result<(), TransportClosed> {
        mpsc::UnboundedSender::send(self, event).map_err(|_| TransportClosed)
    }
}
