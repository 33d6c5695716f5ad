//! Domain Layer - Core price types and session lifecycle.
//!
//! This layer contains the core domain types and policies. Nothing here
//! performs I/O.

/// Exponential backoff with jitter.
pub mod backoff;

/// Price event value type and wire framing.
pub mod price;

/// Client session state machine.
pub mod session;
