//! Publisher
//!
//! Owns the outbound broker link and appends price events to the topic.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::FanoutError;
use super::state::ServiceState;
use crate::application::ports::{BrokerConnector, BrokerProducer};
use crate::domain::backoff::{BackoffConfig, BackoffPolicy};
use crate::domain::price::PriceEvent;
use crate::infrastructure::metrics::{self, LinkRole};

/// Appends price events to the topic over a lazily opened link.
pub struct Publisher {
    connector: Arc<dyn BrokerConnector>,
    topic: String,
    backoff: BackoffConfig,
    state: Arc<ServiceState>,
    producer: Mutex<Option<Box<dyn BrokerProducer>>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Create a disconnected publisher.
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        topic: impl Into<String>,
        backoff: BackoffConfig,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            connector,
            topic: topic.into(),
            backoff,
            state,
            producer: Mutex::new(None),
        }
    }

    /// Topic events are appended to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Open the link unless it is already open.
    ///
    /// Concurrent callers queue on the link lock, so exactly one connect is
    /// issued.
    ///
    /// # Errors
    ///
    /// Returns `BrokerConnectFailed` if the link cannot be opened.
    pub async fn ensure_connected(&self) -> Result<(), FanoutError> {
        let mut producer = self.producer.lock().await;
        if producer.is_some() {
            return Ok(());
        }

        let link = self
            .connector
            .connect_producer()
            .await
            .map_err(FanoutError::BrokerConnectFailed)?;

        *producer = Some(link);
        self.state.set_publisher_connected(true);
        metrics::record_broker_connect(LinkRole::Producer);
        tracing::info!(topic = %self.topic, "Publisher connected");
        Ok(())
    }

    /// Send one event, retrying transient failures with backoff.
    ///
    /// # Errors
    ///
    /// - `ServiceStopped` if the link is not open
    /// - `PublishFailed` once every attempt has failed
    pub async fn publish(&self, event: &PriceEvent) -> Result<(), FanoutError> {
        let payload = event.to_json();
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut policy = BackoffPolicy::new(self.backoff.clone());
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = {
                let producer = self.producer.lock().await;
                let Some(link) = producer.as_ref() else {
                    return Err(FanoutError::ServiceStopped);
                };
                link.send(&self.topic, &payload).await
            };

            let error = match result {
                Ok(()) => {
                    metrics::record_published();
                    tracing::debug!(
                        topic = %self.topic,
                        price = event.price(),
                        attempts,
                        "Price published"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            let delay = if attempts < max_attempts {
                policy.next_delay()
            } else {
                None
            };

            let Some(delay) = delay else {
                metrics::record_publish_failure();
                return Err(FanoutError::PublishFailed {
                    attempts,
                    source: error,
                });
            };

            metrics::record_publish_retry();
            tracing::warn!(
                error = %error,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "Publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Release the link. No-op when already disconnected.
    ///
    /// The connected flag is cleared even if the broker reports an error.
    ///
    /// # Errors
    ///
    /// Returns `DisconnectFailed` if the broker rejected the release.
    pub async fn disconnect(&self) -> Result<(), FanoutError> {
        let Some(link) = self.producer.lock().await.take() else {
            return Ok(());
        };

        self.state.set_publisher_connected(false);
        let result = link
            .disconnect()
            .await
            .map_err(FanoutError::DisconnectFailed);
        tracing::info!(topic = %self.topic, ok = result.is_ok(), "Publisher disconnected");
        result
    }
}
