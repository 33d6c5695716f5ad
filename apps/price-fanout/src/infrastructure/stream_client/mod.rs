//! Price Stream Client
//!
//! Consumes the server-sent price stream and keeps it open across failures.
//! Reconnects are driven by [`ReconnectMachine`]; every price is forwarded
//! as a [`StreamEvent`] on an mpsc channel.

mod reconnect;
mod sse;

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use reconnect::{ConnectionPhase, ReconnectMachine};
pub use sse::{SseFrame, SseParser};

use crate::domain::backoff::BackoffConfig;
use crate::domain::price::PriceEvent;

/// Default delay before the first reconnect.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// Errors & Events
// =============================================================================

/// Stream client errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// The HTTP client could not be built.
    #[error("client build failed: {0}")]
    Build(String),

    /// The request could not be sent.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The response is not an event stream.
    #[error("unexpected content type: {0}")]
    ContentType(String),

    /// Reading the body failed.
    #[error("stream read failed: {0}")]
    Read(String),

    /// The server sent an error event.
    #[error("server error: {0}")]
    Server(String),

    /// The server closed the stream.
    #[error("stream ended")]
    Ended,

    /// Reconnect attempts exhausted.
    #[error("maximum reconnect attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The stream opened.
    Connected,
    /// A price arrived.
    Price(PriceEvent),
    /// The stream was lost.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// Waiting before the next connect.
    Reconnecting {
        /// Consecutive failed attempts.
        attempt: u32,
        /// Wait before the connect.
        delay: Duration,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Stream URL.
    pub url: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Reconnect policy.
    pub reconnect: BackoffConfig,
}

impl StreamClientConfig {
    /// Configuration for `url` with unlimited reconnects starting at two
    /// seconds.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            reconnect: BackoffConfig::unlimited(DEFAULT_RETRY_DELAY, Duration::from_secs(30)),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Server-sent price stream consumer.
#[derive(Debug)]
pub struct StreamClient {
    config: StreamClientConfig,
    http: reqwest::Client,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `StreamClientError::Build` if the HTTP client cannot be built.
    pub fn new(
        config: StreamClientConfig,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, StreamClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamClientError::Build(e.to_string()))?;

        Ok(Self {
            config,
            http,
            event_tx,
            cancel,
        })
    }

    /// Run until cancelled, the receiver goes away, or reconnects run out.
    ///
    /// # Errors
    ///
    /// Returns `MaxReconnectAttemptsExceeded` once the reconnect policy
    /// gives up.
    pub async fn run(self) -> Result<(), StreamClientError> {
        let mut machine = ReconnectMachine::new(self.config.reconnect.clone());

        loop {
            if !machine.connect() {
                return Ok(());
            }
            tracing::debug!(url = %self.config.url, "Connecting to price stream");

            let outcome = tokio::select! {
                () = self.cancel.cancelled() => {
                    machine.close();
                    tracing::info!("Stream client cancelled");
                    return Ok(());
                }
                outcome = self.connect_and_read(&mut machine) => outcome,
            };

            let reason = match outcome {
                Ok(()) => {
                    machine.close();
                    return Ok(());
                }
                Err(e) => e.to_string(),
            };

            tracing::warn!(error = %reason, "Price stream lost");
            if !self.emit(StreamEvent::Disconnected { reason }).await {
                return Ok(());
            }

            let Some(delay) = machine.failed() else {
                return Err(StreamClientError::MaxReconnectAttemptsExceeded);
            };
            let ConnectionPhase::Backoff { attempt, .. } = machine.phase() else {
                return Err(StreamClientError::MaxReconnectAttemptsExceeded);
            };

            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to price stream");
            if !self.emit(StreamEvent::Reconnecting { attempt, delay }).await {
                return Ok(());
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    machine.close();
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return Ok(());
                }
                () = machine.retry_due() => {}
            }
        }
    }

    /// Open one stream and forward prices until it fails.
    ///
    /// `Ok(())` means the event receiver is gone and the client should stop.
    async fn connect_and_read(
        &self,
        machine: &mut ReconnectMachine,
    ) -> Result<(), StreamClientError> {
        let response = self
            .http
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| StreamClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamClientError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(StreamClientError::ContentType(content_type));
        }

        machine.opened();
        tracing::info!(url = %self.config.url, "Price stream connected");
        if !self.emit(StreamEvent::Connected).await {
            return Ok(());
        }

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StreamClientError::Read(e.to_string()))?;

            for frame in parser.feed(&chunk) {
                if frame.is_error() {
                    return Err(StreamClientError::Server(frame.data));
                }

                match PriceEvent::from_json(&frame.data) {
                    Ok(event) => {
                        machine.delivered();
                        if !self.emit(StreamEvent::Price(event)).await {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, data = %frame.data, "Skipping malformed price frame");
                    }
                }
            }
        }

        Err(StreamClientError::Ended)
    }

    async fn emit(&self, event: StreamEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

// =============================================================================
// Tests
// =============================================================================
