//! Stream Session State Machine
//!
//! Pure lifecycle of one client delivery channel:
//!
//! ```text
//! Initializing ──activate──► Active ──close──► Closed
//!       │                                        ▲
//!       └──────────────────close─────────────────┘
//! ```
//!
//! `Closed` is terminal. The async session in the application layer drives
//! this machine and consults it before every delivery.

use std::fmt;

/// Why a session was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away (stream dropped).
    ClientDisconnected,
    /// Attach or delivery failed.
    TransportError(String),
    /// The service was stopped.
    ServiceStopped,
    /// The upstream relay ended.
    RelayClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientDisconnected => write!(f, "client disconnected"),
            Self::TransportError(msg) => write!(f, "transport error: {msg}"),
            Self::ServiceStopped => write!(f, "service stopped"),
            Self::RelayClosed => write!(f, "relay closed"),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Attaching: snapshot and registration in progress.
    #[default]
    Initializing,
    /// Registered and receiving relayed events.
    Active,
    /// Terminal.
    Closed(CloseReason),
}

/// Result of asking the machine for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed.
    Applied,
    /// The transition is not valid from the current state; nothing changed.
    Ignored,
}

impl SessionState {
    /// `Initializing -> Active`.
    pub fn activate(&mut self) -> Transition {
        match self {
            Self::Initializing => {
                *self = Self::Active;
                Transition::Applied
            }
            Self::Active | Self::Closed(_) => Transition::Ignored,
        }
    }

    /// `Initializing | Active -> Closed`. A second close is ignored so the
    /// caller's teardown runs exactly once.
    pub fn close(&mut self, reason: CloseReason) -> Transition {
        match self {
            Self::Initializing | Self::Active => {
                *self = Self::Closed(reason);
                Transition::Applied
            }
            Self::Closed(_) => Transition::Ignored,
        }
    }

    /// Whether relayed events may be delivered.
    #[must_use]
    pub const fn accepts_delivery(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the session reached its terminal state.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Closed(_) => "closed",
        }
    }
}
