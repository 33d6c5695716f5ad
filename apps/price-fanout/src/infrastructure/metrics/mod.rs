//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Poller**: Tick outcomes and upstream fetch latency
//! - **Relay**: Events published, consumed, malformed and retried
//! - **Sessions**: Active sessions, deliveries, lag drops, attach failures
//! - **Broker**: Link connects by role
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_fanout_poll_ticks_total",
        "Poll loop ticks by outcome"
    );
    describe_histogram!(
        "price_fanout_upstream_fetch_seconds",
        "Latency of upstream price fetches"
    );

    describe_counter!(
        "price_fanout_events_published_total",
        "Price events appended to the broker topic"
    );
    describe_counter!(
        "price_fanout_publish_retries_total",
        "Broker send attempts that were retried"
    );
    describe_counter!(
        "price_fanout_publish_failures_total",
        "Publishes abandoned after exhausting retries"
    );
    describe_counter!(
        "price_fanout_messages_consumed_total",
        "Messages read back from the broker topic"
    );
    describe_counter!(
        "price_fanout_messages_malformed_total",
        "Consumed messages dropped because the payload did not parse"
    );
    describe_counter!(
        "price_fanout_consume_errors_total",
        "Broker read or acknowledge failures in the consume loop"
    );

    describe_gauge!(
        "price_fanout_active_sessions",
        "Attached streaming clients"
    );
    describe_counter!(
        "price_fanout_events_delivered_total",
        "Events pushed to streaming clients"
    );
    describe_counter!(
        "price_fanout_events_lagged_total",
        "Events skipped by clients that fell behind"
    );
    describe_counter!(
        "price_fanout_session_attach_failures_total",
        "Client attaches that failed by error kind"
    );

    describe_counter!(
        "price_fanout_broker_connects_total",
        "Broker links opened by role"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetched and published.
    Published,
    /// Upstream fetch failed.
    FetchFailed,
    /// Publisher could not connect.
    ConnectFailed,
    /// Publish gave up.
    PublishFailed,
}

impl TickOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::FetchFailed => "fetch_failed",
            Self::ConnectFailed => "connect_failed",
            Self::PublishFailed => "publish_failed",
        }
    }
}

/// Broker link role label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Publisher link.
    Producer,
    /// Subscriber link.
    Consumer,
}

impl LinkRole {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// Record a finished poll tick.
pub fn record_tick(outcome: TickOutcome) {
    counter!("price_fanout_poll_ticks_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record an upstream fetch duration.
pub fn record_fetch_duration(success: bool, duration: Duration) {
    histogram!(
        "price_fanout_upstream_fetch_seconds",
        "outcome" => if success { "ok" } else { "error" }
    )
    .record(duration.as_secs_f64());
}

/// Record a successful publish.
pub fn record_published() {
    counter!("price_fanout_events_published_total").increment(1);
}

/// Record a retried send.
pub fn record_publish_retry() {
    counter!("price_fanout_publish_retries_total").increment(1);
}

/// Record an abandoned publish.
pub fn record_publish_failure() {
    counter!("price_fanout_publish_failures_total").increment(1);
}

/// Record a consumed message.
pub fn record_consumed(malformed: bool) {
    counter!("price_fanout_messages_consumed_total").increment(1);
    if malformed {
        counter!("price_fanout_messages_malformed_total").increment(1);
    }
}

/// Record a consume loop error.
pub fn record_consume_error() {
    counter!("price_fanout_consume_errors_total").increment(1);
}

/// Update the active session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("price_fanout_active_sessions").set(count as f64);
}

/// Record one delivery to a client.
pub fn record_delivered() {
    counter!("price_fanout_events_delivered_total").increment(1);
}

/// Record events skipped by a lagging client.
pub fn record_lagged(count: u64) {
    counter!("price_fanout_events_lagged_total").increment(count);
}

/// Record a failed attach.
pub fn record_attach_failure(kind: &'static str) {
    counter!("price_fanout_session_attach_failures_total", "kind" => kind).increment(1);
}

/// Record a broker link opened.
pub fn record_broker_connect(role: LinkRole) {
    counter!("price_fanout_broker_connects_total", "role" => role.as_str()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_outcome_as_str() {
        assert_eq!(TickOutcome::Published.as_str(), "published");
        assert_eq!(TickOutcome::FetchFailed.as_str(), "fetch_failed");
        assert_eq!(TickOutcome::ConnectFailed.as_str(), "connect_failed");
        assert_eq!(TickOutcome::PublishFailed.as_str(), "publish_failed");
    }

    #[test]
    fn link_role_as_str() {
        assert_eq!(LinkRole::Producer.as_str(), "producer");
        assert_eq!(LinkRole::Consumer.as_str(), "consumer");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_tick(TickOutcome::Published);
        record_lagged(3);
        set_active_sessions(2);
    }
}
