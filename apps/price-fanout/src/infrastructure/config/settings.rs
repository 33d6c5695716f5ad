//! Fan-out Configuration Settings
//!
//! Configuration types for the fan-out service, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::{PollerMode, ServiceOptions};
use crate::domain::backoff::BackoffConfig;

/// Default upstream price endpoint.
pub const DEFAULT_PRICE_SOURCE_URL: &str =
    "https://stocks.heat-engineer.dev/api/stocks/heat-engineer/current";

/// Which broker implementation backs the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerBackend {
    /// Redis Streams.
    #[default]
    Redis,
    /// In-process broker, single instance only.
    Memory,
}

impl BrokerBackend {
    /// Parse backend from string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unknown names.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "BROKER_BACKEND".to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Parse a poller mode name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` for unknown names.
pub fn parse_poller_mode(s: &str) -> Result<PollerMode, ConfigError> {
    match s.trim().to_lowercase().as_str() {
        "always-on" | "always_on" => Ok(PollerMode::AlwaysOn),
        "on-demand" | "on_demand" => Ok(PollerMode::OnDemand),
        other => Err(ConfigError::InvalidValue {
            key: "POLLER_MODE".to_string(),
            value: other.to_string(),
        }),
    }
}

/// How clients receive prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Server-sent event stream.
    #[default]
    Streaming,
    /// Clients poll `GET` for the latest price.
    Polling,
}

impl DeliveryMode {
    /// Parse mode from string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unknown names.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "streaming" | "sse" => Ok(Self::Streaming),
            "polling" => Ok(Self::Polling),
            other => Err(ConfigError::InvalidValue {
                key: "DELIVERY_MODE".to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Polling => "polling",
        }
    }
}

/// Upstream price endpoint settings.
#[derive(Debug, Clone)]
pub struct PriceSourceSettings {
    /// Endpoint URL.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for PriceSourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_PRICE_SOURCE_URL.to_string(),
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Backend implementation.
    pub backend: BrokerBackend,
    /// Connection URL (Redis backend).
    pub url: String,
    /// Topic carrying price events.
    pub topic: String,
    /// Consumer group joined by the subscriber.
    pub consumer_group: String,
    /// Longest a single consume poll blocks.
    pub block: Duration,
    /// Approximate cap on retained topic entries.
    pub topic_max_len: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            url: "redis://127.0.0.1:6379".to_string(),
            topic: "stock-price".to_string(),
            consumer_group: "price-fanout".to_string(),
            block: Duration::from_millis(200),
            topic_max_len: 10_000,
        }
    }
}

/// Publish retry settings.
#[derive(Debug, Clone)]
pub struct PublishRetrySettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Total send attempts before giving up.
    pub max_attempts: u32,
}

impl Default for PublishRetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            max_attempts: 8,
        }
    }
}

impl From<&PublishRetrySettings> for BackoffConfig {
    fn from(settings: &PublishRetrySettings) -> Self {
        Self {
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            max_attempts: settings.max_attempts,
            ..Self::default()
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen port for the API, health and metrics routes.
    pub http_port: u16,
    /// Whether `/metrics` is served.
    pub metrics_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3000,
            metrics_enabled: true,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Upstream endpoint.
    pub price_source: PriceSourceSettings,
    /// Broker.
    pub broker: BrokerSettings,
    /// Publish retries.
    pub publish_retry: PublishRetrySettings,
    /// Poll interval.
    pub poll_interval: Duration,
    /// Poller lifetime.
    pub poller_mode: PollerMode,
    /// Client delivery mode.
    pub delivery_mode: DeliveryMode,
    /// Per-session hub buffer.
    pub hub_capacity: usize,
    /// HTTP server.
    pub server: ServerSettings,
}

impl FanoutConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let price_source = PriceSourceSettings {
            url: env.non_empty_string("PRICE_SOURCE_URL", DEFAULT_PRICE_SOURCE_URL)?,
            timeout: env.duration_millis(
                "PRICE_SOURCE_TIMEOUT_MS",
                PriceSourceSettings::default().timeout,
            )?,
        };

        let broker_defaults = BrokerSettings::default();
        let broker = BrokerSettings {
            backend: env
                .get("BROKER_BACKEND")
                .map_or(Ok(BrokerBackend::default()), |v| BrokerBackend::parse(&v))?,
            url: env.non_empty_string("BROKER_URL", &broker_defaults.url)?,
            topic: env.non_empty_string("PRICE_TOPIC", &broker_defaults.topic)?,
            consumer_group: env
                .non_empty_string("PRICE_CONSUMER_GROUP", &broker_defaults.consumer_group)?,
            block: env.duration_millis("BROKER_BLOCK_MS", broker_defaults.block)?,
            topic_max_len: env.parse("PRICE_TOPIC_MAX_LEN", broker_defaults.topic_max_len)?,
        };

        let retry_defaults = PublishRetrySettings::default();
        let publish_retry = PublishRetrySettings {
            initial_delay: env
                .duration_millis("PUBLISH_RETRY_INITIAL_MS", retry_defaults.initial_delay)?,
            max_delay: env.duration_millis("PUBLISH_RETRY_MAX_MS", retry_defaults.max_delay)?,
            max_attempts: env.parse("PUBLISH_RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
        };
        if publish_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PUBLISH_RETRY_MAX_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }

        let poll_interval = env.duration_millis("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_MS".to_string(),
                value: "0".to_string(),
            });
        }

        let poller_mode = env
            .get("POLLER_MODE")
            .map_or(Ok(PollerMode::default()), |v| parse_poller_mode(&v))?;
        let delivery_mode = env
            .get("DELIVERY_MODE")
            .map_or(Ok(DeliveryMode::default()), |v| DeliveryMode::parse(&v))?;

        let server = ServerSettings {
            http_port: env.parse("FANOUT_HTTP_PORT", ServerSettings::default().http_port)?,
            metrics_enabled: env.parse("FANOUT_METRICS_ENABLED", true)?,
        };

        Ok(Self {
            price_source,
            broker,
            publish_retry,
            poll_interval,
            poller_mode,
            delivery_mode,
            hub_capacity: env.parse("PRICE_HUB_CAPACITY", DEFAULT_HUB_CAPACITY)?,
            server,
        })
    }

    /// Backoff used by the publisher.
    #[must_use]
    pub fn publish_backoff(&self) -> BackoffConfig {
        BackoffConfig::from(&self.publish_retry)
    }

    /// Options for the fan-out service.
    #[must_use]
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            topic: self.broker.topic.clone(),
            consumer_group: self.broker.consumer_group.clone(),
            poll_interval: self.poll_interval,
            poller_mode: self.poller_mode,
            publish_backoff: self.publish_backoff(),
        }
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_HUB_CAPACITY: usize = 1024;

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            price_source: PriceSourceSettings::default(),
            broker: BrokerSettings::default(),
            publish_retry: PublishRetrySettings::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller_mode: PollerMode::default(),
            delivery_mode: DeliveryMode::default(),
            hub_capacity: DEFAULT_HUB_CAPACITY,
            server: ServerSettings::default(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn non_empty_string(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v.trim().to_string()),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.get(key).map_or(Ok(default), |v| {
            v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            })
        })
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse::<u64>(key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<FanoutConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FanoutConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.price_source.url, DEFAULT_PRICE_SOURCE_URL);
        assert_eq!(config.price_source.timeout, Duration::from_millis(5000));
        assert_eq!(config.broker.backend, BrokerBackend::Redis);
        assert_eq!(config.broker.topic, "stock-price");
        assert_eq!(config.broker.consumer_group, "price-fanout");
        assert_eq!(config.broker.block, Duration::from_millis(200));
        assert_eq!(config.publish_retry.max_attempts, 8);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poller_mode, PollerMode::OnDemand);
        assert_eq!(config.delivery_mode, DeliveryMode::Streaming);
        assert_eq!(config.hub_capacity, 1024);
        assert_eq!(config.server.http_port, 3000);
        assert!(config.server.metrics_enabled);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("BROKER_BACKEND", "memory"),
            ("PRICE_TOPIC", "heat"),
            ("POLL_INTERVAL_MS", "250"),
            ("POLLER_MODE", "always-on"),
            ("DELIVERY_MODE", "polling"),
            ("FANOUT_HTTP_PORT", "8080"),
            ("FANOUT_METRICS_ENABLED", "false"),
        ])
        .unwrap();

        assert_eq!(config.broker.backend, BrokerBackend::Memory);
        assert_eq!(config.broker.topic, "heat");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poller_mode, PollerMode::AlwaysOn);
        assert_eq!(config.delivery_mode, DeliveryMode::Polling);
        assert_eq!(config.server.http_port, 8080);
        assert!(!config.server.metrics_enabled);
    }

    #[test_case("POLL_INTERVAL_MS", "0" ; "zero interval")]
    #[test_case("POLL_INTERVAL_MS", "soon" ; "non numeric interval")]
    #[test_case("POLLER_MODE", "sometimes" ; "unknown poller mode")]
    #[test_case("DELIVERY_MODE", "carrier-pigeon" ; "unknown delivery mode")]
    #[test_case("BROKER_BACKEND", "kafka" ; "unknown backend")]
    #[test_case("PRICE_SOURCE_URL", "  " ; "blank url")]
    #[test_case("PUBLISH_RETRY_MAX_ATTEMPTS", "0" ; "zero attempts")]
    #[test_case("FANOUT_HTTP_PORT", "70000" ; "port out of range")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        assert!(config_from(&[(key, value)]).is_err());
    }

    #[test_case("on-demand", PollerMode::OnDemand)]
    #[test_case("ON_DEMAND", PollerMode::OnDemand)]
    #[test_case("always-on", PollerMode::AlwaysOn)]
    #[test_case(" Always_On ", PollerMode::AlwaysOn)]
    fn poller_mode_parsing(input: &str, expected: PollerMode) {
        assert_eq!(parse_poller_mode(input).unwrap(), expected);
    }

    #[test]
    fn publish_backoff_carries_retry_settings() {
        let config = config_from(&[
            ("PUBLISH_RETRY_INITIAL_MS", "50"),
            ("PUBLISH_RETRY_MAX_ATTEMPTS", "3"),
        ])
        .unwrap();
        let backoff = config.publish_backoff();

        assert_eq!(backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(backoff.max_attempts, 3);
        assert!((backoff.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn service_options_follow_config() {
        let config = config_from(&[
            ("PRICE_TOPIC", "heat"),
            ("PRICE_CONSUMER_GROUP", "edge"),
            ("POLLER_MODE", "always-on"),
        ])
        .unwrap();
        let options = config.service_options();

        assert_eq!(options.topic, "heat");
        assert_eq!(options.consumer_group, "edge");
        assert_eq!(options.poller_mode, PollerMode::AlwaysOn);
        assert_eq!(options.poll_interval, Duration::from_secs(1));
    }
}
