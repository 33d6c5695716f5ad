//! Broadcast Hub
//!
//! In-process fan-out of consumed price events to every attached stream
//! session, built on a tokio broadcast channel.
//!
//! # Architecture
//!
//! The subscriber's consume loop holds the only sender. Each session owns
//! one receiver; dropping the receiver unregisters the session. A session
//! that falls more than `capacity` events behind observes
//! `RecvError::Lagged` and skips forward.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::price::PriceEvent;

/// Default channel capacity.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Fan-out hub for price events.
///
/// # Example
///
/// ```rust
/// use price_fanout::domain::price::PriceEvent;
/// use price_fanout::infrastructure::broadcast::PriceHub;
///
/// let hub = PriceHub::with_defaults();
/// let mut rx = hub.subscribe();
///
/// let event = PriceEvent::new(101.5, "2024-01-01T00:00:00Z").unwrap();
/// assert_eq!(hub.send(event), Some(1));
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug)]
pub struct PriceHub {
    tx: broadcast::Sender<PriceEvent>,
    capacity: usize,
}

impl PriceHub {
    /// Create a hub with the given per-receiver buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tx: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Create a hub with [`DEFAULT_HUB_CAPACITY`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }

    /// Send an event to all receivers.
    ///
    /// Returns the number of receivers, or `None` if nobody is listening.
    #[must_use]
    pub fn send(&self, event: PriceEvent) -> Option<usize> {
        self.tx.send(event).ok()
    }

    /// Register a new receiver. Only events sent after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PriceEvent> {
        self.tx.subscribe()
    }

    /// Number of registered receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            receivers: self.receiver_count(),
            capacity: self.capacity,
        }
    }
}

/// Shared hub reference.
pub type SharedPriceHub = Arc<PriceHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered receivers.
    pub receivers: usize,
    /// Per-receiver buffer size.
    pub capacity: usize,
}
