//! HTTP Streaming Integration Tests
//!
//! Serves the router on a loopback port and follows it with the stream
//! client, the way `price-watch` does.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use price_fanout::{
    BackoffConfig, DeliveryMode, FanoutService, HttpState, MemoryBroker, PollerMode, PriceEvent,
    PriceHub, ScriptedPriceSource, ServiceOptions, StreamClient, StreamClientConfig, StreamEvent,
    router,
};

struct TestServer {
    base: String,
    service: Arc<FanoutService>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

async fn serve(source: ScriptedPriceSource, mode: DeliveryMode) -> TestServer {
    let service = Arc::new(FanoutService::new(
        ServiceOptions {
            poll_interval: Duration::from_millis(25),
            poller_mode: PollerMode::OnDemand,
            ..ServiceOptions::default()
        },
        Arc::new(source),
        Arc::new(MemoryBroker::new()),
        Arc::new(PriceHub::with_defaults()),
    ));
    let state = Arc::new(HttpState::new(
        "test-0.0.1".to_string(),
        Arc::clone(&service),
        mode,
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();

    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state, false))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        service,
        cancel,
        handle,
    }
}

impl TestServer {
    async fn shutdown(self) {
        self.service.stop().await.unwrap();
        self.cancel.cancel();
        timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

async fn next(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("no stream event in time")
        .expect("stream client ended")
}

fn client_config(url: String) -> StreamClientConfig {
    StreamClientConfig {
        reconnect: BackoffConfig::unlimited(Duration::from_millis(20), Duration::from_millis(50)),
        ..StreamClientConfig::new(url)
    }
}

#[tokio::test]
async fn stream_client_follows_relayed_prices() {
    let source = ScriptedPriceSource::new();
    source.push_price(PriceEvent::new(100.0, "2024-01-01T00:00:00Z").unwrap());
    source.set_fallback(Ok(PriceEvent::new(101.5, "2024-01-01T00:00:01Z").unwrap()));
    let server = serve(source, DeliveryMode::Streaming).await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = StreamClient::new(
        client_config(format!("{}/api/stock-price", server.base)),
        tx,
        cancel.clone(),
    )
    .unwrap();
    let client_task = tokio::spawn(client.run());

    assert_eq!(next(&mut rx).await, StreamEvent::Connected);
    let StreamEvent::Price(snapshot) = next(&mut rx).await else {
        panic!("expected snapshot");
    };
    assert_eq!(snapshot.price(), 100.0);
    let StreamEvent::Price(relayed) = next(&mut rx).await else {
        panic!("expected relayed price");
    };
    assert_eq!(relayed.price(), 101.5);
    assert_eq!(server.service.state().active_sinks, 1);

    cancel.cancel();
    client_task.await.unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn delete_ends_the_stream_and_the_client_reconnects() {
    let source = ScriptedPriceSource::new();
    let server = serve(source, DeliveryMode::Streaming).await;

    let (tx, mut rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    let client = StreamClient::new(
        client_config(format!("{}/api/stock-price", server.base)),
        tx,
        cancel.clone(),
    )
    .unwrap();
    let client_task = tokio::spawn(client.run());
    assert_eq!(next(&mut rx).await, StreamEvent::Connected);

    let response = reqwest::Client::new()
        .delete(format!("{}/api/stock-price", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"status":"stopped"}"#);

    // Drain prices until the stream ends, then expect a reconnect.
    loop {
        match next(&mut rx).await {
            StreamEvent::Price(_) => {}
            StreamEvent::Disconnected { reason } => {
                assert!(reason.contains("ended"));
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(matches!(
        next(&mut rx).await,
        StreamEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(next(&mut rx).await, StreamEvent::Connected);

    cancel.cancel();
    client_task.await.unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn polling_mode_serves_json() {
    let source = ScriptedPriceSource::new();
    source.push_price(PriceEvent::new(101.5, "2024-01-01T00:00:00Z").unwrap());
    let server = serve(source, DeliveryMode::Polling).await;

    let body = reqwest::get(format!("{}/api/stock-price", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, r#"{"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}"#);
    assert!(server.service.state().is_idle());
    server.shutdown().await;
}

#[tokio::test]
async fn health_reports_pipeline_state() {
    let server = serve(ScriptedPriceSource::new(), DeliveryMode::Streaming).await;

    let health: serde_json::Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["version"], "test-0.0.1");
    assert_eq!(health["pipeline"]["active_sinks"], 0);
    assert_eq!(health["hub"]["receivers"], 0);

    let ready = reqwest::get(format!("{}/readyz", server.base)).await.unwrap();
    assert_eq!(ready.status(), 200);

    let metrics = reqwest::get(format!("{}/metrics", server.base)).await.unwrap();
    assert_eq!(metrics.status(), 404);

    server.shutdown().await;
}
