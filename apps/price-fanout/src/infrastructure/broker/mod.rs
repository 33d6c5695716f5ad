//! Broker Adapters
//!
//! Implementations of the broker ports.
//!
//! - [`RedisBroker`]: Redis Streams, one stream per topic, consumer groups
//!   for the subscriber side
//! - [`MemoryBroker`]: in-process topics with the same group semantics, for
//!   tests and single-instance deployments

pub mod memory;
pub mod redis_streams;

pub use memory::MemoryBroker;
pub use redis_streams::RedisBroker;
