//! Price Event Types
//!
//! The single value carried through the whole pipeline: produced by the
//! price source, published to the broker, consumed back and pushed to every
//! attached client without modification.
//!
//! # Wire Formats
//!
//! - Broker payload: `{"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}`
//! - Client frame: `data: {"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}\n\n`

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Reasons a value cannot become a [`PriceEvent`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceEventError {
    /// Price is zero, negative, NaN or infinite.
    #[error("price must be a positive finite number, got {0}")]
    InvalidPrice(f64),

    /// Timestamp is empty.
    #[error("timestamp must not be empty")]
    MissingTimestamp,

    /// Payload is not a JSON object of the expected shape.
    #[error("malformed price payload: {0}")]
    Malformed(String),
}

// =============================================================================
// Price Event
// =============================================================================

/// One observed price.
///
/// Fields are private so that every instance has passed validation; the
/// value is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceEvent")]
pub struct PriceEvent {
    price: f64,
    timestamp: String,
}

/// Unvalidated shape used for deserialization.
#[derive(Deserialize)]
struct RawPriceEvent {
    price: f64,
    timestamp: String,
}

impl TryFrom<RawPriceEvent> for PriceEvent {
    type Error = PriceEventError;

    fn try_from(raw: RawPriceEvent) -> Result<Self, Self::Error> {
        Self::new(raw.price, raw.timestamp)
    }
}

impl PriceEvent {
    /// Create a validated price event.
    ///
    /// # Errors
    ///
    /// Returns `PriceEventError` if the price is not a positive finite number
    /// or the timestamp is blank.
    pub fn new(price: f64, timestamp: impl Into<String>) -> Result<Self, PriceEventError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(PriceEventError::InvalidPrice(price));
        }

        let timestamp = timestamp.into();
        if timestamp.trim().is_empty() {
            return Err(PriceEventError::MissingTimestamp);
        }

        Ok(Self { price, timestamp })
    }

    /// The observed price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Source-defined timestamp (usually ISO-8601).
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parse a broker payload or an upstream response body.
    ///
    /// # Errors
    ///
    /// Returns `PriceEventError` if the text is not a valid price event.
    pub fn from_json(text: &str) -> Result<Self, PriceEventError> {
        serde_json::from_str(text).map_err(|e| {
            // serde wraps our own validation errors as custom messages
            PriceEventError::Malformed(e.to_string())
        })
    }

    /// Serialize as the broker wire payload.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "price": self.price,
            "timestamp": self.timestamp,
        })
        .to_string()
    }

    /// Frame as a server-sent event for streaming clients.
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// Frame a terminal stream error as a server-sent event.
#[must_use]
pub fn error_sse_frame(message: &str) -> String {
    let body = serde_json::json!({ "error": message });
    format!("event: error\ndata: {body}\n\n")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn serializes_in_wire_order() {
        let event = PriceEvent::new(101.5, "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            event.to_json(),
            r#"{"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}"#
        );
    }

    #[test]
    fn sse_frame_format() {
        let event = PriceEvent::new(101.5, "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            event.to_sse_frame(),
            "data: {\"price\":101.5,\"timestamp\":\"2024-01-01T00:00:00Z\"}\n\n"
        );
    }

    #[test]
    fn error_frame_format() {
        let frame = error_sse_frame("upstream down");
        assert_eq!(frame, "event: error\ndata: {\"error\":\"upstream down\"}\n\n");
    }

    #[test]
    fn parses_upstream_body_with_extra_fields() {
        let event =
            PriceEvent::from_json(r#"{"price": 42.25, "timestamp": "t0", "symbol": "HEAT"}"#)
                .unwrap();
        assert!((event.price() - 42.25).abs() < f64::EPSILON);
        assert_eq!(event.timestamp(), "t0");
    }

    #[test]
    fn rejects_string_price() {
        let result = PriceEvent::from_json(r#"{"price": "42.25", "timestamp": "t0"}"#);
        assert!(matches!(result, Err(PriceEventError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_timestamp() {
        let result = PriceEvent::from_json(r#"{"price": 42.25}"#);
        assert!(matches!(result, Err(PriceEventError::Malformed(_))));
    }

    #[test]
    fn rejects_blank_timestamp() {
        assert_eq!(
            PriceEvent::new(1.0, "  "),
            Err(PriceEventError::MissingTimestamp)
        );
    }

    #[test]
    fn rejects_non_positive_price() {
        assert!(PriceEvent::new(0.0, "t").is_err());
        assert!(PriceEvent::new(-3.0, "t").is_err());
        assert!(PriceEvent::new(f64::NAN, "t").is_err());
        assert!(PriceEvent::new(f64::INFINITY, "t").is_err());
    }

    #[test]
    fn rejects_zero_price_in_payload() {
        let result = PriceEvent::from_json(r#"{"price": 0, "timestamp": "t0"}"#);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn positive_prices_survive_the_broker_payload(price in 0.0001f64..1.0e9, ts in "[0-9T:Z-]{1,30}") {
            let event = PriceEvent::new(price, ts).unwrap();
            let decoded = PriceEvent::from_json(&event.to_json()).unwrap();
            prop_assert!((decoded.price() - event.price()).abs() <= event.price() * 1e-12);
            prop_assert_eq!(decoded.timestamp(), event.timestamp());
        }

        #[test]
        fn negative_prices_never_validate(price in -1.0e9f64..=0.0) {
            prop_assert!(PriceEvent::new(price, "t").is_err());
        }
    }
}
