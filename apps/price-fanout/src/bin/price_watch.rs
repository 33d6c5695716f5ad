//! Price Watch
//!
//! Follows a running fan-out service's price stream and logs every price,
//! reconnecting whenever the stream drops.
//!
//! ```bash
//! cargo run --bin price-watch -- --url http://localhost:3000/api/stock-price
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use price_fanout::domain::backoff::BackoffConfig;
use price_fanout::infrastructure::telemetry::{self, TelemetryConfig};
use price_fanout::{StreamClient, StreamClientConfig, StreamEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Command-line arguments for the price watcher.
#[derive(Parser, Debug)]
#[command(author, version, about = "Follows a price fan-out stream", long_about = None)]
struct Args {
    /// Stream endpoint.
    #[arg(
        short,
        long,
        env = "PRICE_STREAM_URL",
        default_value = "http://localhost:3000/api/stock-price"
    )]
    url: String,

    /// Delay before the first reconnect, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    retry_ms: u64,

    /// Give up after this many consecutive failures (0 = never).
    #[arg(long, default_value_t = 0)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _telemetry_guard = telemetry::init_with_config(TelemetryConfig::console_only());

    let config = StreamClientConfig {
        reconnect: BackoffConfig {
            max_attempts: args.max_attempts,
            ..BackoffConfig::unlimited(Duration::from_millis(args.retry_ms), Duration::from_secs(30))
        },
        ..StreamClientConfig::new(args.url.clone())
    };

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = StreamClient::new(config, tx, cancel.clone()).context("building stream client")?;
    let client_task = tokio::spawn(client.run());

    tracing::info!(url = %args.url, "Watching price stream");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, stopping");
                cancel.cancel();
                break;
            }
            event = rx.recv() => match event {
                Some(StreamEvent::Price(price)) => {
                    tracing::info!(price = price.price(), timestamp = %price.timestamp(), "Price");
                }
                Some(StreamEvent::Connected) => tracing::info!("Stream connected"),
                Some(StreamEvent::Disconnected { reason }) => {
                    tracing::warn!(reason = %reason, "Stream disconnected");
                }
                Some(StreamEvent::Reconnecting { attempt, delay }) => {
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
                }
                None => break,
            },
        }
    }

    drop(rx);
    client_task
        .await
        .context("stream client task panicked")?
        .context("price stream gave up")?;
    Ok(())
}
