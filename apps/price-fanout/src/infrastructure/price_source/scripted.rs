//! Scripted price source for tests and local runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{PriceSource, PriceSourceError};
use crate::domain::price::PriceEvent;

/// Price source answering from a script, then from a fallback.
///
/// Scripted responses are consumed in order. Once the script is empty every
/// call returns the fallback, which defaults to a fixed price stamped with
/// the current time.
#[derive(Debug)]
pub struct ScriptedPriceSource {
    script: Mutex<VecDeque<Result<PriceEvent, PriceSourceError>>>,
    fallback: Mutex<Option<Result<PriceEvent, PriceSourceError>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl Default for ScriptedPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPriceSource {
    /// Default fallback price.
    pub const DEFAULT_PRICE: f64 = 100.0;

    /// Create a source with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue one response.
    pub fn push(&self, response: Result<PriceEvent, PriceSourceError>) {
        self.script.lock().push_back(response);
    }

    /// Queue one successful price.
    pub fn push_price(&self, event: PriceEvent) {
        self.push(Ok(event));
    }

    /// Answer with `response` whenever the script is empty.
    pub fn set_fallback(&self, response: Result<PriceEvent, PriceSourceError>) {
        *self.fallback.lock() = Some(response);
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of fetches made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_event() -> Result<PriceEvent, PriceSourceError> {
        PriceEvent::new(Self::DEFAULT_PRICE, chrono::Utc::now().to_rfc3339())
            .map_err(|e| PriceSourceError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl PriceSource for ScriptedPriceSource {
    async fn fetch_price(&self) -> Result<PriceEvent, PriceSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(next) = self.script.lock().pop_front() {
            return next;
        }

        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(Self::default_event)
    }
}
