#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Price Fanout - Live Price Distribution
//!
//! Polls an upstream price endpoint, relays every price through a broker
//! topic and pushes it to any number of streaming HTTP clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Price events, session lifecycle, backoff policy
//!   - `price`: `PriceEvent` and its wire framing
//!   - `session`: Client session state machine
//!   - `backoff`: Exponential backoff with jitter
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price source and broker interfaces
//!   - `services`: Publisher, poller, subscriber, sessions, lifecycle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `price_source`: HTTP upstream and a scripted test source
//!   - `broker`: Redis Streams and in-memory brokers
//!   - `broadcast`: Hub fanning relayed prices out to sessions
//!   - `http`: Client API, health and metrics routes
//!   - `stream_client`: Reconnecting consumer of the price stream
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                ┌─────────┐     ┌───────────┐     ┌─────────────┐
//! Upstream ◄──── │ Poller  │ ──► │ Publisher │ ──► │ broker topic│
//!   API          └─────────┘     └───────────┘     └──────┬──────┘
//!    │                                                    │
//!    │ snapshot  ┌─────────┐     ┌───────────┐     ┌──────▼──────┐
//!    └─────────► │ Session │ ◄── │ PriceHub  │ ◄── │ Subscriber  │
//!                └────┬────┘     └───────────┘     └─────────────┘
//!                     ▼
//!                 SSE client 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::backoff::{BackoffConfig, BackoffPolicy};
pub use domain::price::{PriceEvent, PriceEventError};
pub use domain::session::{CloseReason, SessionState};

// Ports
pub use application::ports::{
    BrokerConnector, BrokerConsumer, BrokerError, BrokerMessage, BrokerProducer, PriceSource,
    PriceSourceError,
};

// Services
pub use application::services::{
    FanoutError, FanoutService, PollerMode, ServiceOptions, ServiceStateSnapshot, StreamSession,
};

// Infrastructure config
pub use infrastructure::config::{
    BrokerBackend, BrokerSettings, ConfigError, DeliveryMode, FanoutConfig, PriceSourceSettings,
    PublishRetrySettings, ServerSettings,
};

// Adapters
pub use infrastructure::broadcast::{HubStats, PriceHub, SharedPriceHub};
pub use infrastructure::broker::{MemoryBroker, RedisBroker};
pub use infrastructure::price_source::{HttpPriceSource, ScriptedPriceSource};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState, router};

// Stream client
pub use infrastructure::stream_client::{
    StreamClient, StreamClientConfig, StreamClientError, StreamEvent,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
