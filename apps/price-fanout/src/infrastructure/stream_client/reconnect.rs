//! Reconnect State Machine
//!
//! ```text
//!                 connect               opened
//! Disconnected ──────────► Connecting ─────────► Connected
//!      ▲                    │    ▲                   │
//!      │ close /            │    │ connect           │ failed
//!      │ exhausted   failed ▼    │                   │
//!      └──────────────── Backoff{attempt, delay} ◄───┘
//! ```
//!
//! The machine owns at most one retry timer. Every transition out of
//! `Backoff` drops it and every failure replaces it, so a stale timer can
//! never fire a second connect.
//!
//! Opening the stream is not enough to reset the backoff: a server may
//! accept the request and immediately send an error event. The sequence
//! starts over only once the stream has delivered data.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

use crate::domain::backoff::{BackoffConfig, BackoffPolicy};

/// Connection phase of a stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Not connected and not retrying.
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// The stream is open.
    Connected,
    /// Waiting before the next connect.
    Backoff {
        /// Consecutive failed attempts.
        attempt: u32,
        /// Wait before the next connect.
        delay: Duration,
    },
}

impl ConnectionPhase {
    /// Phase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff { .. } => "backoff",
        }
    }
}

/// Explicit reconnect state for one stream.
pub struct ReconnectMachine {
    phase: ConnectionPhase,
    policy: BackoffPolicy,
    timer: Option<Pin<Box<Sleep>>>,
}

impl std::fmt::Debug for ReconnectMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectMachine")
            .field("phase", &self.phase)
            .field("timer_armed", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReconnectMachine {
    /// Create a machine in `Disconnected`.
    #[must_use]
    pub const fn new(backoff: BackoffConfig) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            policy: BackoffPolicy::new(backoff),
            timer: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether a retry timer is armed.
    #[must_use]
    pub const fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Begin a connect. Ignored while connecting or connected.
    ///
    /// Returns `true` if the caller should open the stream.
    pub fn connect(&mut self) -> bool {
        match self.phase {
            ConnectionPhase::Disconnected | ConnectionPhase::Backoff { .. } => {
                self.timer = None;
                self.phase = ConnectionPhase::Connecting;
                true
            }
            ConnectionPhase::Connecting | ConnectionPhase::Connected => false,
        }
    }

    /// The stream opened. The backoff sequence is kept until
    /// [`delivered`](Self::delivered).
    pub fn opened(&mut self) {
        if self.phase == ConnectionPhase::Connecting {
            self.timer = None;
            self.phase = ConnectionPhase::Connected;
        }
    }

    /// The open stream delivered data. Resets the backoff sequence.
    pub fn delivered(&mut self) {
        if self.phase == ConnectionPhase::Connected && self.policy.attempt_count() > 0 {
            self.policy.reset();
        }
    }

    /// The connect or the open stream failed.
    ///
    /// Arms a fresh timer and returns the delay, or moves to `Disconnected`
    /// and returns `None` once attempts are exhausted.
    pub fn failed(&mut self) -> Option<Duration> {
        if matches!(
            self.phase,
            ConnectionPhase::Disconnected | ConnectionPhase::Backoff { .. }
        ) {
            return None;
        }

        let Some(delay) = self.policy.next_delay() else {
            self.timer = None;
            self.phase = ConnectionPhase::Disconnected;
            return None;
        };

        self.timer = Some(Box::pin(tokio::time::sleep_until(Instant::now() + delay)));
        self.phase = ConnectionPhase::Backoff {
            attempt: self.policy.attempt_count(),
            delay,
        };
        Some(delay)
    }

    /// Stop for good. Drops any pending timer.
    pub fn close(&mut self) {
        self.timer = None;
        self.phase = ConnectionPhase::Disconnected;
    }

    /// Resolves when the armed retry timer fires. Pending forever if no
    /// timer is armed.
    pub async fn retry_due(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().await,
            None => std::future::pending().await,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
