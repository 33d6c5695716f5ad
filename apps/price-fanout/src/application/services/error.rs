//! Service error taxonomy.

use crate::application::ports::{BrokerError, PriceSourceError};

/// Errors surfaced by the fan-out services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FanoutError {
    /// The price source could not be reached or answered non-2xx.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The price source answered with something that is not a price.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// Publishing gave up after exhausting retries.
    #[error("publish failed after {attempts} attempts: {source}")]
    PublishFailed {
        /// Send attempts made.
        attempts: u32,
        /// Last broker error.
        #[source]
        source: BrokerError,
    },

    /// A broker link could not be opened.
    #[error("broker connect failed: {0}")]
    BrokerConnectFailed(#[source] BrokerError),

    /// The consume loop failed irrecoverably.
    #[error("consume error: {0}")]
    ConsumeError(#[source] BrokerError),

    /// Releasing a broker link failed. The link is considered gone.
    #[error("broker disconnect failed: {0}")]
    DisconnectFailed(#[source] BrokerError),

    /// The service was stopped while the operation was in flight.
    #[error("service stopped")]
    ServiceStopped,
}

impl From<PriceSourceError> for FanoutError {
    fn from(err: PriceSourceError) -> Self {
        match err {
            PriceSourceError::UpstreamUnavailable(msg) => Self::UpstreamUnavailable(msg),
            PriceSourceError::MalformedResponse(msg) => Self::MalformedResponse(msg),
        }
    }
}

impl FanoutError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::MalformedResponse(_) => "malformed_response",
            Self::PublishFailed { .. } => "publish_failed",
            Self::BrokerConnectFailed(_) => "broker_connect_failed",
            Self::ConsumeError(_) => "consume_error",
            Self::DisconnectFailed(_) => "disconnect_failed",
            Self::ServiceStopped => "service_stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_source_errors_map_by_kind() {
        let unavailable: FanoutError = PriceSourceError::UpstreamUnavailable("503".into()).into();
        let malformed: FanoutError = PriceSourceError::MalformedResponse("nope".into()).into();

        assert!(matches!(unavailable, FanoutError::UpstreamUnavailable(_)));
        assert_eq!(malformed.kind(), "malformed_response");
    }

    #[test]
    fn publish_failed_message_includes_attempts() {
        let err = FanoutError::PublishFailed {
            attempts: 8,
            source: BrokerError::Send("timeout".into()),
        };
        assert_eq!(
            err.to_string(),
            "publish failed after 8 attempts: broker send failed: timeout"
        );
    }
}
