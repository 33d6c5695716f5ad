//! Service Lifecycle
//!
//! [`FanoutService`] wires the price source, publisher, poller, subscriber
//! and hub together. It is created idle; the first attach brings the relay
//! up, and `stop` tears everything down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::error::FanoutError;
use super::poller::Poller;
use super::publisher::Publisher;
use super::session::{SinkRegistry, StreamSession};
use super::state::{ServiceState, ServiceStateSnapshot};
use super::subscriber::{EventHandler, Subscriber};
use crate::application::ports::{BrokerConnector, PriceSource};
use crate::domain::backoff::BackoffConfig;
use crate::domain::price::PriceEvent;
use crate::domain::session::CloseReason;
use crate::infrastructure::broadcast::SharedPriceHub;
use crate::infrastructure::metrics;

/// How long the poller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollerMode {
    /// Started by the first client and kept running until `stop`.
    AlwaysOn,
    /// Runs only while at least one streaming client is attached.
    #[default]
    OnDemand,
}

impl PollerMode {
    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlwaysOn => "always-on",
            Self::OnDemand => "on-demand",
        }
    }
}

/// Knobs for [`FanoutService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Topic carrying price events.
    pub topic: String,
    /// Consumer group joined by the subscriber.
    pub consumer_group: String,
    /// Poll interval.
    pub poll_interval: Duration,
    /// Poller lifetime.
    pub poller_mode: PollerMode,
    /// Publish retry policy.
    pub publish_backoff: BackoffConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            topic: "stock-price".to_string(),
            consumer_group: "price-fanout".to_string(),
            poll_interval: Duration::from_secs(1),
            poller_mode: PollerMode::default(),
            publish_backoff: BackoffConfig::default(),
        }
    }
}

/// The fan-out pipeline for one process.
///
/// All sessions share one publisher, one subscriber and one poller.
pub struct FanoutService {
    options: ServiceOptions,
    state: Arc<ServiceState>,
    source: Arc<dyn PriceSource>,
    publisher: Arc<Publisher>,
    poller: Arc<Poller>,
    subscriber: Subscriber,
    hub: SharedPriceHub,
    sinks: Arc<SinkRegistry>,
    generation: Mutex<CancellationToken>,
    /// Attach holds a read guard while bringing the relay up; stop holds
    /// the write guard.
    transition: RwLock<()>,
}

impl std::fmt::Debug for FanoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutService")
            .field("options", &self.options)
            .field("state", &self.state.snapshot())
            .finish_non_exhaustive()
    }
}

impl FanoutService {
    /// Assemble an idle service.
    #[must_use]
    pub fn new(
        options: ServiceOptions,
        source: Arc<dyn PriceSource>,
        connector: Arc<dyn BrokerConnector>,
        hub: SharedPriceHub,
    ) -> Self {
        let state = Arc::new(ServiceState::new());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&connector),
            options.topic.clone(),
            options.publish_backoff.clone(),
            Arc::clone(&state),
        ));
        let poller = Arc::new(Poller::new(
            Arc::clone(&source),
            Arc::clone(&publisher),
            Arc::clone(&state),
        ));
        let subscriber = Subscriber::new(
            connector,
            options.topic.clone(),
            options.consumer_group.clone(),
            Arc::clone(&state),
        );
        let sinks = Arc::new(SinkRegistry::new(
            Arc::clone(&state),
            Arc::clone(&poller),
            options.poller_mode,
            options.poll_interval,
        ));

        Self {
            options,
            state,
            source,
            publisher,
            poller,
            subscriber,
            hub,
            sinks,
            generation: Mutex::new(CancellationToken::new()),
            transition: RwLock::new(()),
        }
    }

    /// Attach a streaming client.
    ///
    /// Fetches a snapshot straight from the price source, registers the
    /// session with the hub, then brings up the relay: publisher, subscriber
    /// and poller.
    ///
    /// # Errors
    ///
    /// Any failure is terminal for this client only; the session is closed
    /// and its sink released before the error is returned. An attach that
    /// was overtaken by `stop` fails with `ServiceStopped` and leaves the
    /// service idle.
    pub async fn attach(&self) -> Result<StreamSession, FanoutError> {
        let stopped = self.generation.lock().clone();

        let started = Instant::now();
        let fetched = self.source.fetch_price().await;
        metrics::record_fetch_duration(fetched.is_ok(), started.elapsed());
        let snapshot = fetched.map_err(|e| {
            let err = FanoutError::from(e);
            metrics::record_attach_failure(err.kind());
            tracing::warn!(error = %err, "Attach failed, no snapshot");
            err
        })?;

        let _transition = self.transition.read().await;
        if stopped.is_cancelled() {
            let err = FanoutError::ServiceStopped;
            metrics::record_attach_failure(err.kind());
            tracing::info!("Attach overtaken by stop");
            return Err(err);
        }

        let mut session = StreamSession::new(snapshot, stopped);
        session.register(self.hub.subscribe(), self.sinks.acquire());

        if let Err(err) = self.ensure_relay().await {
            metrics::record_attach_failure(err.kind());
            tracing::warn!(session_id = %session.id(), error = %err, "Attach failed, relay unavailable");
            session.close(CloseReason::TransportError(err.to_string()));
            return Err(err);
        }

        self.sinks.demand_poller();
        session.activate();
        Ok(session)
    }

    /// Fetch the current price for a polling client.
    ///
    /// # Errors
    ///
    /// Returns the price source failure.
    pub async fn latest_price(&self) -> Result<PriceEvent, FanoutError> {
        let started = Instant::now();
        let fetched = self.source.fetch_price().await;
        metrics::record_fetch_duration(fetched.is_ok(), started.elapsed());
        fetched.map_err(FanoutError::from)
    }

    /// Tear the pipeline down.
    ///
    /// Ends every session, cancels the poller, disconnects the publisher and
    /// the subscriber. Every step runs even if an earlier one failed; the
    /// first error is returned. Afterwards the state is idle and a new
    /// attach starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns the first disconnect failure.
    pub async fn stop(&self) -> Result<(), FanoutError> {
        let _transition = self.transition.write().await;
        let previous = std::mem::replace(&mut *self.generation.lock(), CancellationToken::new());
        previous.cancel();

        let mut first_error = None;

        self.poller.stop().await;

        if let Err(e) = self.publisher.disconnect().await {
            tracing::warn!(error = %e, "Publisher disconnect failed during stop");
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.subscriber.disconnect().await {
            tracing::warn!(error = %e, "Subscriber disconnect failed during stop");
            first_error.get_or_insert(e);
        }

        self.state.reset_sinks();
        metrics::set_active_sessions(0);
        tracing::info!(clean = first_error.is_none(), "Fan-out service stopped");

        first_error.map_or(Ok(()), Err)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ServiceStateSnapshot {
        self.state.snapshot()
    }

    /// The hub sessions receive from.
    #[must_use]
    pub const fn hub(&self) -> &SharedPriceHub {
        &self.hub
    }

    /// Configured options.
    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Poll ticks completed so far.
    #[must_use]
    pub fn poll_ticks(&self) -> u64 {
        self.poller.tick_count()
    }

    async fn ensure_relay(&self) -> Result<(), FanoutError> {
        self.publisher.ensure_connected().await?;
        self.subscriber.ensure_connected(self.relay_handler()).await
    }

    fn relay_handler(&self) -> EventHandler {
        let hub = Arc::clone(&self.hub);
        Arc::new(move |event| {
            if hub.send(event).is_none() {
                tracing::trace!("No sessions attached, event dropped");
            }
        })
    }
}
