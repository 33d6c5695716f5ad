//! Subscriber
//!
//! Owns the inbound broker link. A background consume loop reads the topic
//! through the consumer group and hands every valid event to the installed
//! handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::FanoutError;
use super::state::ServiceState;
use crate::application::ports::{BrokerConnector, BrokerConsumer, BrokerError, BrokerMessage};
use crate::domain::backoff::{BackoffConfig, BackoffPolicy};
use crate::domain::price::PriceEvent;
use crate::infrastructure::metrics::{self, LinkRole};

/// Callback invoked for every relayed event.
pub type EventHandler = Arc<dyn Fn(PriceEvent) + Send + Sync>;

const CONSUME_RETRY_INITIAL: Duration = Duration::from_millis(100);
const CONSUME_RETRY_MAX: Duration = Duration::from_secs(5);

struct ConsumeTask {
    cancel: CancellationToken,
    handle: JoinHandle<Box<dyn BrokerConsumer>>,
}

/// Relays topic messages to an in-process handler.
pub struct Subscriber {
    connector: Arc<dyn BrokerConnector>,
    topic: String,
    group: String,
    state: Arc<ServiceState>,
    task: Mutex<Option<ConsumeTask>>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    /// Create a disconnected subscriber.
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        topic: impl Into<String>,
        group: impl Into<String>,
        state: Arc<ServiceState>,
    ) -> Self {
        Self {
            connector,
            topic: topic.into(),
            group: group.into(),
            state,
            task: Mutex::new(None),
        }
    }

    /// Connect, join the group at the current end of the topic and start
    /// the consume loop. No-op while the loop is running.
    ///
    /// The handler of the first successful call stays installed until
    /// [`disconnect`](Self::disconnect).
    ///
    /// # Errors
    ///
    /// Returns `BrokerConnectFailed` if the link cannot be opened.
    pub async fn ensure_connected(&self, on_event: EventHandler) -> Result<(), FanoutError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(());
        }

        let consumer = self
            .connector
            .connect_consumer(&self.topic, &self.group)
            .await
            .map_err(FanoutError::BrokerConnectFailed)?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consume_loop(consumer, on_event, cancel.clone()));

        *task = Some(ConsumeTask { cancel, handle });
        self.state.set_subscriber_connected(true);
        metrics::record_broker_connect(LinkRole::Consumer);
        tracing::info!(topic = %self.topic, group = %self.group, "Subscriber connected");
        Ok(())
    }

    /// Stop the consume loop and release the link. No-op when disconnected.
    ///
    /// # Errors
    ///
    /// - `ConsumeError` if the loop panicked
    /// - `DisconnectFailed` if the broker rejected the release
    pub async fn disconnect(&self) -> Result<(), FanoutError> {
        let Some(ConsumeTask { cancel, handle }) = self.task.lock().await.take() else {
            return Ok(());
        };

        cancel.cancel();
        self.state.set_subscriber_connected(false);

        let result = match handle.await {
            Ok(mut consumer) => consumer
                .disconnect()
                .await
                .map_err(FanoutError::DisconnectFailed),
            Err(e) => Err(FanoutError::ConsumeError(BrokerError::Receive(e.to_string()))),
        };
        tracing::info!(topic = %self.topic, ok = result.is_ok(), "Subscriber disconnected");
        result
    }
}

async fn consume_loop(
    mut consumer: Box<dyn BrokerConsumer>,
    on_event: EventHandler,
    cancel: CancellationToken,
) -> Box<dyn BrokerConsumer> {
    let mut backoff = BackoffPolicy::new(BackoffConfig::unlimited(
        CONSUME_RETRY_INITIAL,
        CONSUME_RETRY_MAX,
    ));

    loop {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            batch = consumer.poll() => batch,
        };

        match batch {
            Ok(messages) => {
                backoff.reset();
                for message in messages {
                    dispatch(&message, &on_event);
                    if let Err(e) = consumer.ack(&message.id).await {
                        metrics::record_consume_error();
                        tracing::warn!(error = %e, id = %message.id, "Ack failed");
                    }
                }
            }
            Err(e) => {
                metrics::record_consume_error();
                let delay = backoff.next_delay().unwrap_or(CONSUME_RETRY_MAX);
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Consume failed, backing off"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    consumer
}

fn dispatch(message: &BrokerMessage, on_event: &EventHandler) {
    match PriceEvent::from_json(&message.payload) {
        Ok(event) => {
            metrics::record_consumed(false);
            on_event(event);
        }
        Err(e) => {
            metrics::record_consumed(true);
            tracing::warn!(error = %e, id = %message.id, "Dropping malformed message");
        }
    }
}
