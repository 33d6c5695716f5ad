//! Poller
//!
//! Periodic loop: fetch the current price, make sure the publisher is
//! connected, publish. A failed tick is logged and the next tick runs on
//! schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::publisher::Publisher;
use super::state::ServiceState;
use crate::application::ports::PriceSource;
use crate::infrastructure::metrics::{self, TickOutcome};

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the fetch-and-publish loop. At most one loop runs per poller.
pub struct Poller {
    source: Arc<dyn PriceSource>,
    publisher: Arc<Publisher>,
    state: Arc<ServiceState>,
    task: Mutex<Option<PollTask>>,
    ticks: Arc<AtomicU64>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("running", &self.is_running())
            .field("ticks", &self.tick_count())
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Create a stopped poller.
    #[must_use]
    pub fn new(
        source: Arc<dyn PriceSource>,
        publisher: Arc<Publisher>,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            source,
            publisher,
            state,
            task: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the loop. The first tick runs immediately.
    ///
    /// Returns `false` without doing anything if a loop is already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.publisher),
            Arc::clone(&self.ticks),
            interval,
            cancel.clone(),
        ));

        *task = Some(PollTask { cancel, handle });
        self.state.set_poller_active(true);
        tracing::info!(interval_ms = interval.as_millis(), "Poller started");
        true
    }

    /// Cancel the loop and wait for it to exit. Safe when not started.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        self.state.set_poller_active(false);

        if let Some(PollTask { cancel, handle }) = task {
            cancel.cancel();
            match handle.await {
                Err(e) if e.is_panic() => tracing::error!(error = %e, "Poller task panicked"),
                _ => {}
            }
            tracing::info!(ticks = self.tick_count(), "Poller stopped");
        }
    }

    /// Cancel the loop without waiting for it.
    ///
    /// The loop exits at its next await point.
    pub fn request_stop(&self) {
        let task = self.task.lock().take();
        self.state.set_poller_active(false);

        if let Some(PollTask { cancel, .. }) = task {
            cancel.cancel();
            tracing::info!("Poller stop requested");
        }
    }

    /// Whether a loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Ticks completed since creation, across restarts.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn run_loop(
    source: Arc<dyn PriceSource>,
    publisher: Arc<Publisher>,
    ticks: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = run_tick(source.as_ref(), &publisher) => outcome,
        };

        metrics::record_tick(outcome);
        ticks.fetch_add(1, Ordering::Relaxed);
    }
}

async fn run_tick(source: &dyn PriceSource, publisher: &Publisher) -> TickOutcome {
    let started = Instant::now();
    let fetched = source.fetch_price().await;
    metrics::record_fetch_duration(fetched.is_ok(), started.elapsed());

    let event = match fetched {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Price fetch failed, skipping tick");
            return TickOutcome::FetchFailed;
        }
    };

    if let Err(e) = publisher.ensure_connected().await {
        tracing::warn!(error = %e, "Publisher unavailable, skipping tick");
        return TickOutcome::ConnectFailed;
    }

    match publisher.publish(&event).await {
        Ok(()) => TickOutcome::Published,
        Err(e) => {
            tracing::warn!(error = %e, price = event.price(), "Publish abandoned");
            TickOutcome::PublishFailed
        }
    }
}
