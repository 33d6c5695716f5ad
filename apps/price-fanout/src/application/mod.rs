//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (price source, broker).
pub mod ports;

/// Application services: publisher, poller, subscriber, sessions, lifecycle.
pub mod services;
