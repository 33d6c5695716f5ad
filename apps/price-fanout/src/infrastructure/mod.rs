//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surface.

/// Broadcast hub feeding stream sessions.
pub mod broadcast;

/// Broker adapters (Redis Streams, in-memory).
pub mod broker;

/// Configuration loaded from the environment.
pub mod config;

/// Client API, health checks and metrics over HTTP.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Upstream price endpoint adapters.
pub mod price_source;

/// Server-sent price stream consumer with reconnects.
pub mod stream_client;

/// OpenTelemetry tracing integration.
pub mod telemetry;
