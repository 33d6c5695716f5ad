//! Redis Streams Broker Integration Tests
//!
//! Need a live Redis. Run with
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_streams -- --ignored`.
//! Every test uses its own stream key and deletes it afterwards.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamPendingReply;
use uuid::Uuid;

use price_fanout::{BrokerConnector, BrokerConsumer, BrokerMessage, RedisBroker};

const GROUP: &str = "price-fanout-test";

struct Fixture {
    broker: RedisBroker,
    conn: MultiplexedConnection,
    topic: String,
}

impl Fixture {
    /// `None` when `REDIS_URL` is unset.
    async fn new() -> Option<Self> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set, skipping");
            return None;
        };
        let broker = RedisBroker::new(&url, 1000, Duration::from_millis(100)).unwrap();
        let conn = redis::Client::open(url.as_str())
            .unwrap()
            .get_multiplexed_async_connection()
            .await
            .unwrap();
        Some(Self {
            broker,
            conn,
            topic: format!("stock-price-test-{}", Uuid::new_v4()),
        })
    }

    async fn pending(&mut self) -> usize {
        let reply: StreamPendingReply = self.conn.xpending(&self.topic, GROUP).await.unwrap();
        reply.count()
    }

    async fn cleanup(mut self) {
        let _: i64 = self.conn.del(&self.topic).await.unwrap();
    }
}

/// Poll until `want` messages arrived or a second passed.
async fn collect(consumer: &mut Box<dyn BrokerConsumer>, want: usize) -> Vec<BrokerMessage> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while messages.len() < want && tokio::time::Instant::now() < deadline {
        messages.extend(consumer.poll().await.unwrap());
    }
    messages
}

fn payloads(messages: &[BrokerMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.payload.as_str()).collect()
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn new_group_starts_at_the_end_of_the_stream() {
    let Some(fx) = Fixture::new().await else { return };
    let producer = fx.broker.connect_producer().await.unwrap();
    producer.send(&fx.topic, "old").await.unwrap();

    let mut consumer = fx.broker.connect_consumer(&fx.topic, GROUP).await.unwrap();
    producer.send(&fx.topic, "new").await.unwrap();

    let messages = collect(&mut consumer, 1).await;
    assert_eq!(payloads(&messages), vec!["new"]);

    consumer.disconnect().await.unwrap();
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn rejoining_an_existing_group_skips_history() {
    let Some(fx) = Fixture::new().await else { return };
    let producer = fx.broker.connect_producer().await.unwrap();

    let mut first = fx.broker.connect_consumer(&fx.topic, GROUP).await.unwrap();
    first.disconnect().await.unwrap();
    producer.send(&fx.topic, "stale").await.unwrap();

    let mut second = fx.broker.connect_consumer(&fx.topic, GROUP).await.unwrap();
    assert!(second.poll().await.unwrap().is_empty());

    producer.send(&fx.topic, "fresh").await.unwrap();
    let messages = collect(&mut second, 1).await;
    assert_eq!(payloads(&messages), vec!["fresh"]);

    second.disconnect().await.unwrap();
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn ack_clears_pending_entries() {
    let Some(mut fx) = Fixture::new().await else { return };
    let producer = fx.broker.connect_producer().await.unwrap();
    let mut consumer = fx.broker.connect_consumer(&fx.topic, GROUP).await.unwrap();

    producer.send(&fx.topic, "a").await.unwrap();
    producer.send(&fx.topic, "b").await.unwrap();
    let messages = collect(&mut consumer, 2).await;
    assert_eq!(payloads(&messages), vec!["a", "b"]);
    assert_eq!(fx.pending().await, 2);

    for message in &messages {
        consumer.ack(&message.id).await.unwrap();
    }
    assert_eq!(fx.pending().await, 0);

    consumer.disconnect().await.unwrap();
    fx.cleanup().await;
}

#[tokio::test]
#[ignore = "requires REDIS_URL"]
async fn entry_without_payload_field_reads_as_empty() {
    let Some(mut fx) = Fixture::new().await else { return };
    let mut consumer = fx.broker.connect_consumer(&fx.topic, GROUP).await.unwrap();

    let _: String = fx
        .conn
        .xadd(&fx.topic, "*", &[("other", "x")])
        .await
        .unwrap();

    let messages = collect(&mut consumer, 1).await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].payload.is_empty());
    consumer.ack(&messages[0].id).await.unwrap();

    consumer.disconnect().await.unwrap();
    fx.cleanup().await;
}
