//! Shared Service State
//!
//! Connection flags and the attached sink count. Components flip their own
//! flag through crate-private mutators; everyone else reads a snapshot.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time view of [`ServiceState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStateSnapshot {
    /// Publisher holds an open broker link.
    pub publisher_connected: bool,
    /// Subscriber holds an open broker link and its consume loop runs.
    pub subscriber_connected: bool,
    /// The poll loop is running.
    pub poller_active: bool,
    /// Attached stream sessions.
    pub active_sinks: usize,
}

impl ServiceStateSnapshot {
    /// Everything torn down.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.publisher_connected
            && !self.subscriber_connected
            && !self.poller_active
            && self.active_sinks == 0
    }
}

#[derive(Debug, Default)]
struct SinkLedger {
    count: usize,
    epoch: u64,
}

/// Process-wide service state, shared as `Arc<ServiceState>`.
#[derive(Debug, Default)]
pub struct ServiceState {
    publisher_connected: AtomicBool,
    subscriber_connected: AtomicBool,
    poller_active: AtomicBool,
    sinks: Mutex<SinkLedger>,
}

impl ServiceState {
    /// Fresh state with everything disconnected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all fields.
    #[must_use]
    pub fn snapshot(&self) -> ServiceStateSnapshot {
        ServiceStateSnapshot {
            publisher_connected: self.publisher_connected.load(Ordering::Acquire),
            subscriber_connected: self.subscriber_connected.load(Ordering::Acquire),
            poller_active: self.poller_active.load(Ordering::Acquire),
            active_sinks: self.sinks.lock().count,
        }
    }

    /// Attached sessions.
    #[must_use]
    pub fn active_sinks(&self) -> usize {
        self.sinks.lock().count
    }

    pub(crate) fn set_publisher_connected(&self, connected: bool) {
        self.publisher_connected.store(connected, Ordering::Release);
    }

    pub(crate) fn set_subscriber_connected(&self, connected: bool) {
        self.subscriber_connected.store(connected, Ordering::Release);
    }

    pub(crate) fn set_poller_active(&self, active: bool) {
        self.poller_active.store(active, Ordering::Release);
    }

    /// Count one new sink. Returns the epoch the sink belongs to.
    pub(crate) fn acquire_sink(&self) -> u64 {
        let mut sinks = self.sinks.lock();
        sinks.count += 1;
        sinks.epoch
    }

    /// Release a sink acquired in `epoch`.
    ///
    /// Sinks from before the last reset were already zeroed and are ignored.
    /// Returns the remaining count when the release applied.
    pub(crate) fn release_sink(&self, epoch: u64) -> Option<usize> {
        let mut sinks = self.sinks.lock();
        if sinks.epoch != epoch {
            return None;
        }
        sinks.count = sinks.count.saturating_sub(1);
        Some(sinks.count)
    }

    /// Zero the sink count and start a new epoch.
    pub(crate) fn reset_sinks(&self) {
        let mut sinks = self.sinks.lock();
        sinks.count = 0;
        sinks.epoch = sinks.epoch.wrapping_add(1);
    }
}
