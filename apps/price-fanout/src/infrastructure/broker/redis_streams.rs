//! Redis Streams Broker
//!
//! Topic = stream key. Each entry carries one field, `payload`, holding the
//! JSON price event.
//!
//! # Consumer Groups
//!
//! The subscriber joins a group positioned at `$`. If the group already
//! exists its last-delivered ID is moved to `$`, so a process that joins
//! late starts from the current end instead of replaying history. Entries
//! are acknowledged after dispatch.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamReadReply};
use redis::{Client, RedisError};
use uuid::Uuid;

use crate::application::ports::{
    BrokerConnector, BrokerConsumer, BrokerError, BrokerMessage, BrokerProducer,
};

/// Field name holding the payload in each stream entry.
pub const PAYLOAD_FIELD: &str = "payload";

/// Upper bound for `XREADGROUP ... BLOCK`, kept below the client's response
/// timeout.
const MAX_BLOCK: Duration = Duration::from_millis(400);

/// Entries read per poll.
const READ_COUNT: usize = 64;

/// Opens Redis Streams links.
#[derive(Debug, Clone)]
pub struct RedisBroker {
    client: Client,
    max_len: usize,
    block: Duration,
}

impl RedisBroker {
    /// Create a connector for `url`. No connection is made until a link is
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connect` if the URL is invalid.
    pub fn new(url: &str, max_len: usize, block: Duration) -> Result<Self, BrokerError> {
        let client = Client::open(url).map_err(connect_error)?;
        Ok(Self {
            client,
            max_len,
            block: block.min(MAX_BLOCK),
        })
    }
}

#[async_trait]
impl BrokerConnector for RedisBroker {
    async fn connect_producer(&self) -> Result<Box<dyn BrokerProducer>, BrokerError> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(connect_error)?;

        Ok(Box::new(RedisProducer {
            conn,
            max_len: self.max_len,
        }))
    }

    async fn connect_consumer(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn BrokerConsumer>, BrokerError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_error)?;

        join_group_at_end(&mut conn, topic, group).await?;

        let consumer = format!("{group}-{}", Uuid::new_v4());
        tracing::debug!(topic, group, consumer = %consumer, "Joined consumer group");

        Ok(Box::new(RedisConsumer {
            conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer,
            block_ms: u64::try_from(self.block.as_millis()).unwrap_or(0),
        }))
    }
}

async fn join_group_at_end(
    conn: &mut MultiplexedConnection,
    topic: &str,
    group: &str,
) -> Result<(), BrokerError> {
    let created: Result<String, RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(topic)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(_) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => {
            let _: String = redis::cmd("XGROUP")
                .arg("SETID")
                .arg(topic)
                .arg(group)
                .arg("$")
                .query_async(conn)
                .await
                .map_err(connect_error)?;
            Ok(())
        }
        Err(e) => Err(connect_error(e)),
    }
}

fn connect_error(e: RedisError) -> BrokerError {
    BrokerError::Connect(e.to_string())
}

/// Producer link.
struct RedisProducer {
    conn: ConnectionManager,
    max_len: usize,
}

#[async_trait]
impl BrokerProducer for RedisProducer {
    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Send(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        // the managed connection closes when the last clone is dropped
        Ok(())
    }
}

/// Consumer link. One group member with a unique name.
struct RedisConsumer {
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
    block_ms: u64,
}

#[async_trait]
impl BrokerConsumer for RedisConsumer {
    async fn poll(&mut self) -> Result<Vec<BrokerMessage>, BrokerError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("STREAMS")
            .arg(&self.topic)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| BrokerError::Receive(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let messages = reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(message_from_entry)
            .collect();
        Ok(messages)
    }

    async fn ack(&mut self, id: &str) -> Result<(), BrokerError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| BrokerError::Receive(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let _: i64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(&self.consumer)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| BrokerError::Disconnect(e.to_string()))?;
        Ok(())
    }
}

/// Entries without a readable payload yield an empty one, which the
/// subscriber acknowledges and drops as malformed.
fn message_from_entry(entry: StreamId) -> BrokerMessage {
    let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_else(|| {
        tracing::warn!(id = %entry.id, "Stream entry has no payload field");
        String::new()
    });
    BrokerMessage {
        id: entry.id,
        payload,
    }
}
