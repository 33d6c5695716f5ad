//! In-Memory Broker
//!
//! Topics are append-only logs; consumer groups keep a shared cursor. A
//! consumer joining a group moves the cursor to the current end, matching
//! the Redis adapter's no-replay join.
//!
//! Faults can be injected for tests: failing connects, sends, polls and
//! disconnects, plus an artificial connect delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::{
    BrokerConnector, BrokerConsumer, BrokerError, BrokerMessage, BrokerProducer,
};

const DEFAULT_BLOCK: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Topic {
    entries: Vec<String>,
    groups: HashMap<String, Group>,
}

#[derive(Debug, Default)]
struct Group {
    cursor: usize,
    acked: usize,
}

#[derive(Debug, Default)]
struct Faults {
    fail_connects: bool,
    fail_disconnects: bool,
    failing_sends: u32,
    failing_polls: u32,
    connect_delay: Duration,
}

#[derive(Debug)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    faults: Mutex<Faults>,
    appended: Notify,
    producer_connects: AtomicUsize,
    consumer_connects: AtomicUsize,
    failed_sends: AtomicUsize,
    block: Duration,
}

/// In-process broker. Clones share the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::with_block(DEFAULT_BLOCK)
    }

    /// Create an empty broker whose polls wait at most `block`.
    #[must_use]
    pub fn with_block(block: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                appended: Notify::new(),
                producer_connects: AtomicUsize::new(0),
                consumer_connects: AtomicUsize::new(0),
                failed_sends: AtomicUsize::new(0),
                block,
            }),
        }
    }

    /// Payloads appended to `topic`, oldest first.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<String> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|t| t.entries.clone())
            .unwrap_or_default()
    }

    /// Messages acknowledged by `group` on `topic`.
    #[must_use]
    pub fn acked(&self, topic: &str, group: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map_or(0, |g| g.acked)
    }

    /// Producer links opened so far.
    #[must_use]
    pub fn producer_connects(&self) -> usize {
        self.inner.producer_connects.load(Ordering::SeqCst)
    }

    /// Consumer links opened so far.
    #[must_use]
    pub fn consumer_connects(&self) -> usize {
        self.inner.consumer_connects.load(Ordering::SeqCst)
    }

    /// Sends rejected by fault injection so far.
    #[must_use]
    pub fn failed_sends(&self) -> usize {
        self.inner.failed_sends.load(Ordering::SeqCst)
    }

    /// Make every connect fail until cleared.
    pub fn fail_connects(&self, fail: bool) {
        self.inner.faults.lock().fail_connects = fail;
    }

    /// Make every disconnect fail until cleared.
    pub fn fail_disconnects(&self, fail: bool) {
        self.inner.faults.lock().fail_disconnects = fail;
    }

    /// Fail the next `n` sends.
    pub fn fail_next_sends(&self, n: u32) {
        self.inner.faults.lock().failing_sends = n;
    }

    /// Fail the next `n` polls.
    pub fn fail_next_polls(&self, n: u32) {
        self.inner.faults.lock().failing_polls = n;
    }

    /// Delay every connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.inner.faults.lock().connect_delay = delay;
    }

    async fn connect_gate(&self) -> Result<(), BrokerError> {
        let delay = self.inner.faults.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.faults.lock().fail_connects {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect_producer(&self) -> Result<Box<dyn BrokerProducer>, BrokerError> {
        self.connect_gate().await?;
        self.inner.producer_connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryProducer {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn connect_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        self.connect_gate().await?;

        {
            let mut topics = self.inner.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let end = log.entries.len();
            log.groups.entry(group.to_string()).or_default().cursor = end;
        }

        self.inner.consumer_connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
        }))
    }
}

struct MemoryProducer {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        {
            let mut faults = self.inner.faults.lock();
            if faults.failing_sends > 0 {
                faults.failing_sends -= 1;
                self.inner.failed_sends.fetch_add(1, Ordering::SeqCst);
                return Err(BrokerError::Send("injected send failure".to_string()));
            }
        }

        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .entries
            .push(payload.to_string());
        self.inner.appended.notify_waiters();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if self.inner.faults.lock().fail_disconnects {
            return Err(BrokerError::Disconnect("injected disconnect failure".to_string()));
        }
        Ok(())
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    topic: String,
    group: String,
}

impl MemoryConsumer {
    fn take_batch(&self) -> Vec<BrokerMessage> {
        let mut topics = self.inner.topics.lock();
        let log = topics.entry(self.topic.clone()).or_default();
        let end = log.entries.len();
        let group = log.groups.entry(self.group.clone()).or_default();
        let start = group.cursor.min(end);
        group.cursor = end;

        log.entries[start..end]
            .iter()
            .enumerate()
            .map(|(offset, payload)| BrokerMessage {
                id: format!("{}-0", start + offset),
                payload: payload.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll(&mut self) -> Result<Vec<BrokerMessage>, BrokerError> {
        {
            let mut faults = self.inner.faults.lock();
            if faults.failing_polls > 0 {
                faults.failing_polls -= 1;
                return Err(BrokerError::Receive("injected poll failure".to_string()));
            }
        }

        let appended = self.inner.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();

        let batch = self.take_batch();
        if !batch.is_empty() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(self.inner.block, appended).await;
        Ok(self.take_batch())
    }

    async fn ack(&mut self, _id: &str) -> Result<(), BrokerError> {
        let mut topics = self.inner.topics.lock();
        if let Some(group) = topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
        {
            group.acked += 1;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if self.inner.faults.lock().fail_disconnects {
            return Err(BrokerError::Disconnect("injected disconnect failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_starts_at_end() {
        let broker = MemoryBroker::new();
        let producer = broker.connect_producer().await.unwrap();
        producer.send("t", "old").await.unwrap();

        let mut consumer = broker.connect_consumer("t", "g").await.unwrap();
        producer.send("t", "new").await.unwrap();

        let batch = consumer.poll().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "new");
        assert_eq!(batch[0].id, "1-0");
    }

    #[tokio::test]
    async fn poll_wakes_on_append() {
        let broker = MemoryBroker::with_block(Duration::from_secs(5));
        let mut consumer = broker.connect_consumer("t", "g").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();

        let poll = tokio::spawn(async move { consumer.poll().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.send("t", "x").await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), poll)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn empty_poll_returns_after_block() {
        let broker = MemoryBroker::with_block(Duration::from_millis(10));
        let mut consumer = broker.connect_consumer("t", "g").await.unwrap();

        assert!(consumer.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_of_one_group_share_the_cursor() {
        let broker = MemoryBroker::with_block(Duration::from_millis(10));
        let mut a = broker.connect_consumer("t", "g").await.unwrap();
        let mut b = broker.connect_consumer("t", "g").await.unwrap();
        let producer = broker.connect_producer().await.unwrap();
        producer.send("t", "x").await.unwrap();

        let total = a.poll().await.unwrap().len() + b.poll().await.unwrap().len();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn injected_faults() {
        let broker = MemoryBroker::new();
        broker.fail_connects(true);
        assert!(broker.connect_producer().await.is_err());
        broker.fail_connects(false);

        let producer = broker.connect_producer().await.unwrap();
        broker.fail_next_sends(1);
        assert!(producer.send("t", "x").await.is_err());
        assert!(producer.send("t", "x").await.is_ok());
        assert_eq!(broker.failed_sends(), 1);

        broker.fail_disconnects(true);
        assert!(producer.disconnect().await.is_err());
    }
}
