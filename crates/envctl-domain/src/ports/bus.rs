//! Event bus and status-reporting capabilities
//!
//! Workers never hold a reference to the bus object itself; they receive the
//! narrow [`StatusSink`] capability, which is all they need to report state
//! and stream log output.

use std::pin::Pin;

use futures::Stream;

use crate::events::{BusMessage, LogEntry};
use crate::value_objects::ServiceSnapshot;

/// Independent cursor over the bus, delivered in per-source FIFO order
pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Process-wide fan-out bus for state updates and log entries
pub trait EventBus: Send + Sync {
    /// Publish a message. Never blocks beyond the bounded per-source queue;
    /// under backpressure the bus drops older non-terminal state updates and
    /// emits a backpressure notification for the affected label.
    fn publish(&self, msg: BusMessage);

    /// Open an independent cursor. A subscriber that falls too far behind is
    /// detached and a backpressure notification is published.
    fn subscribe(&self) -> BusStream;
}

/// Narrow reporting capability handed to each worker
pub trait StatusSink: Send + Sync {
    /// Record a snapshot; identical snapshots are swallowed upstream.
    fn update(&self, snapshot: ServiceSnapshot);

    /// Stream one line of service log output.
    fn log(&self, entry: LogEntry);
}
