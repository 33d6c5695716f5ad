//! Configuration Module
//!
//! Configuration loading for the fan-out service.

mod settings;

pub use settings::{
    BrokerBackend, BrokerSettings, ConfigError, DEFAULT_PRICE_SOURCE_URL, DeliveryMode,
    FanoutConfig, PriceSourceSettings, PublishRetrySettings, ServerSettings, parse_poller_mode,
};
