//! Price Source Adapters
//!
//! Implementations of `PriceSource`.

pub mod http;
pub mod scripted;

pub use http::HttpPriceSource;
pub use scripted::ScriptedPriceSource;
