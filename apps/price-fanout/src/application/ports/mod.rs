//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: Fetches the current price from the upstream endpoint
//! - `BrokerConnector`: Opens producer and consumer links to the broker
//! - `BrokerProducer` / `BrokerConsumer`: One open broker link each

use async_trait::async_trait;

use crate::domain::price::PriceEvent;

// =============================================================================
// Price Source
// =============================================================================

/// Errors from the price source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceSourceError {
    /// Transport failed or the upstream answered with a non-success status.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The body could not be parsed into a price event.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

/// Fetches the current price on demand.
///
/// Implementations perform exactly one uncached request per call and never
/// retry; callers own the retry policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the latest price.
    async fn fetch_price(&self) -> Result<PriceEvent, PriceSourceError>;
}

// =============================================================================
// Broker
// =============================================================================

/// Errors from a broker link.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Could not open a link.
    #[error("broker connect failed: {0}")]
    Connect(String),

    /// A send failed; retrying may succeed.
    #[error("broker send failed: {0}")]
    Send(String),

    /// A read or acknowledgement failed.
    #[error("broker receive failed: {0}")]
    Receive(String),

    /// Closing the link failed.
    #[error("broker disconnect failed: {0}")]
    Disconnect(String),
}

/// One message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Broker-assigned entry ID used for acknowledgement.
    pub id: String,
    /// Raw payload text.
    pub payload: String,
}

/// Opens links to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open an outbound link for publishing.
    async fn connect_producer(&self) -> Result<Box<dyn BrokerProducer>, BrokerError>;

    /// Open an inbound link that joins `group` on `topic`, positioned at the
    /// current end of the topic.
    async fn connect_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError>;
}

/// An open outbound broker link.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Append one payload to `topic`.
    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Release the link.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// An open inbound broker link.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait briefly for new messages. An empty batch means nothing arrived
    /// within the link's poll window.
    async fn poll(&mut self) -> Result<Vec<BrokerMessage>, BrokerError>;

    /// Acknowledge a processed message.
    async fn ack(&mut self, id: &str) -> Result<(), BrokerError>;

    /// Release the link.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
