//! Stream Sessions
//!
//! One [`StreamSession`] per attached client. The session owns its hub
//! receiver and its sink lease; dropping the session closes it, which
//! unregisters the receiver and releases the lease exactly once.
//!
//! # Sink Accounting
//!
//! ```text
//! attach ──► SinkRegistry::acquire ──► active_sinks += 1
//!                                            │
//!                        demand_poller ◄─────┘ (starts poller if sinks > 0)
//!
//! close  ──► SinkLease::drop ──► active_sinks -= 1
//!                                     │
//!                       on-demand and 0 left ──► Poller::request_stop
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::lifecycle::PollerMode;
use super::poller::Poller;
use super::state::ServiceState;
use crate::domain::price::PriceEvent;
use crate::domain::session::{CloseReason, SessionState, Transition};
use crate::infrastructure::metrics;

// =============================================================================
// Sink Registry
// =============================================================================

/// Tracks attached sinks and ties poller demand to them.
///
/// Count changes and poller start/stop decisions happen under one lock so a
/// release racing an attach cannot stop the poller under a live session.
pub(crate) struct SinkRegistry {
    state: Arc<ServiceState>,
    poller: Arc<Poller>,
    mode: PollerMode,
    interval: Duration,
    demand: Mutex<()>,
}

impl SinkRegistry {
    pub(crate) fn new(
        state: Arc<ServiceState>,
        poller: Arc<Poller>,
        mode: PollerMode,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            poller,
            mode,
            interval,
            demand: Mutex::new(()),
        }
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> SinkLease {
        let _demand = self.demand.lock();
        let epoch = self.state.acquire_sink();
        metrics::set_active_sessions(self.state.active_sinks());
        SinkLease {
            registry: Arc::clone(self),
            epoch,
        }
    }

    /// Start the poller if any sink is attached.
    pub(crate) fn demand_poller(&self) {
        let _demand = self.demand.lock();
        if self.state.active_sinks() > 0 {
            self.poller.start(self.interval);
        }
    }

    fn release(&self, epoch: u64) {
        let _demand = self.demand.lock();
        let Some(remaining) = self.state.release_sink(epoch) else {
            return;
        };
        metrics::set_active_sessions(remaining);

        if remaining == 0 && self.mode == PollerMode::OnDemand {
            tracing::debug!("Last session detached, stopping poller");
            self.poller.request_stop();
        }
    }
}

/// One counted sink. Released on drop.
pub(crate) struct SinkLease {
    registry: Arc<SinkRegistry>,
    epoch: u64,
}

impl Drop for SinkLease {
    fn drop(&mut self) {
        self.registry.release(self.epoch);
    }
}

// =============================================================================
// Stream Session
// =============================================================================

/// One attached streaming client.
///
/// Yields the attach snapshot first, then every relayed event while the
/// session is active.
pub struct StreamSession {
    id: Uuid,
    state: SessionState,
    snapshot: Option<PriceEvent>,
    rx: Option<broadcast::Receiver<PriceEvent>>,
    lease: Option<SinkLease>,
    stopped: CancellationToken,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    pub(crate) fn new(snapshot: PriceEvent, stopped: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Initializing,
            snapshot: Some(snapshot),
            rx: None,
            lease: None,
            stopped,
        }
    }

    /// Register with the hub and take a sink lease.
    pub(crate) fn register(&mut self, rx: broadcast::Receiver<PriceEvent>, lease: SinkLease) {
        self.rx = Some(rx);
        self.lease = Some(lease);
    }

    pub(crate) fn activate(&mut self) {
        if self.state.activate() == Transition::Applied {
            tracing::info!(session_id = %self.id, "Session active");
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Close the session. Only the first close has any effect.
    pub fn close(&mut self, reason: CloseReason) {
        let message = reason.to_string();
        if self.state.close(reason) == Transition::Applied {
            self.rx = None;
            self.lease = None;
            tracing::info!(session_id = %self.id, reason = %message, "Session closed");
        }
    }

    /// Next event for the client, or `None` once the session is closed.
    pub async fn next_event(&mut self) -> Option<PriceEvent> {
        if let Some(snapshot) = self.snapshot.take() {
            metrics::record_delivered();
            return Some(snapshot);
        }

        loop {
            if !self.state.accepts_delivery() {
                return None;
            }

            let received = {
                let rx = self.rx.as_mut()?;
                tokio::select! {
                    biased;
                    () = self.stopped.cancelled() => None,
                    received = rx.recv() => Some(received),
                }
            };

            match received {
                None => {
                    self.close(CloseReason::ServiceStopped);
                    return None;
                }
                Some(Ok(event)) => {
                    metrics::record_delivered();
                    return Some(event);
                }
                Some(Err(RecvError::Lagged(skipped))) => {
                    metrics::record_lagged(skipped);
                    tracing::warn!(session_id = %self.id, skipped, "Session lagging, events skipped");
                }
                Some(Err(RecvError::Closed)) => {
                    self.close(CloseReason::RelayClosed);
                    return None;
                }
            }
        }
    }

    /// Turn the session into a stream of server-sent event frames.
    ///
    /// Dropping the stream closes the session as a client disconnect.
    pub fn into_sse_stream(self) -> BoxStream<'static, String> {
        futures::stream::unfold(self, |mut session| async move {
            session
                .next_event()
                .await
                .map(|event| (event.to_sse_frame(), session))
        })
        .boxed()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close(CloseReason::ClientDisconnected);
    }
}
