//! Price Fanout Binary
//!
//! Starts the price fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-fanout
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_SOURCE_URL`: Upstream price endpoint
//! - `PRICE_SOURCE_TIMEOUT_MS`: Upstream request timeout (default: 5000)
//! - `BROKER_BACKEND`: redis | memory (default: redis)
//! - `BROKER_URL`: Redis URL (default: redis://127.0.0.1:6379)
//! - `PRICE_TOPIC`: Stream key carrying prices (default: stock-price)
//! - `PRICE_CONSUMER_GROUP`: Consumer group (default: price-fanout)
//! - `BROKER_BLOCK_MS`: Longest consume poll (default: 200)
//! - `PRICE_TOPIC_MAX_LEN`: Approximate stream length cap (default: 10000)
//! - `PUBLISH_RETRY_INITIAL_MS` / `PUBLISH_RETRY_MAX_MS` / `PUBLISH_RETRY_MAX_ATTEMPTS`
//! - `POLL_INTERVAL_MS`: Upstream poll interval (default: 1000)
//! - `POLLER_MODE`: always-on | on-demand (default: on-demand)
//! - `DELIVERY_MODE`: streaming | polling (default: streaming)
//! - `PRICE_HUB_CAPACITY`: Per-session buffer (default: 1024)
//! - `FANOUT_HTTP_PORT`: HTTP port (default: 3000)
//! - `FANOUT_METRICS_ENABLED`: Serve `/metrics` (default: true)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;
use std::time::Duration;

use price_fanout::application::ports::BrokerConnector;
use price_fanout::infrastructure::telemetry;
use price_fanout::{
    BrokerBackend, FanoutConfig, FanoutService, HttpPriceSource, HttpServer, HttpState,
    MemoryBroker, PriceHub, RedisBroker, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price fan-out service");

    let config = FanoutConfig::from_env()?;
    log_config(&config);

    let _metrics_handle = if config.server.metrics_enabled {
        init_metrics()
            .map_err(|e| tracing::warn!(error = %e, "Metrics recorder unavailable"))
            .ok()
    } else {
        None
    };

    let shutdown_token = CancellationToken::new();

    let source = Arc::new(HttpPriceSource::new(
        config.price_source.url.clone(),
        config.price_source.timeout,
    )?);

    let connector: Arc<dyn BrokerConnector> = match config.broker.backend {
        BrokerBackend::Redis => Arc::new(RedisBroker::new(
            &config.broker.url,
            config.broker.topic_max_len,
            config.broker.block,
        )?),
        BrokerBackend::Memory => Arc::new(MemoryBroker::with_block(config.broker.block)),
    };

    let hub = Arc::new(PriceHub::new(config.hub_capacity));
    let service = Arc::new(FanoutService::new(
        config.service_options(),
        source,
        connector,
        hub,
    ));

    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
        config.delivery_mode,
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        http_state,
        config.server.metrics_enabled,
        shutdown_token.clone(),
    );

    let server_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Price fan-out ready");

    await_shutdown(shutdown_token).await;

    // Ends every open stream so the server can drain.
    if let Err(e) = service.stop().await {
        tracing::warn!(error = %e, "Pipeline stop reported an error");
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "HTTP server did not drain in time"
        );
    }

    tracing::info!("Price fan-out stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FanoutConfig) {
    tracing::info!(
        broker = config.broker.backend.as_str(),
        topic = %config.broker.topic,
        consumer_group = %config.broker.consumer_group,
        poll_interval_ms = config.poll_interval.as_millis(),
        poller_mode = config.poller_mode.as_str(),
        delivery_mode = config.delivery_mode.as_str(),
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(price_source = %config.price_source.url, "Upstream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
