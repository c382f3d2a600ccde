//! Outbound message bus.
//!
//! The relay only needs `publish(topic, payload)`. [`RedisStreamBus`] appends
//! to a Redis stream per topic; [`InMemoryBus`] records messages in memory and
//! backs tests and dry runs.

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error};

/// Approximate cap on entries kept per topic stream
const TOPIC_MAX_LEN: usize = 10000;

/// Errors that can occur while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("bus command error: {0}")]
    Command(String),
}

/// Publish capability of the internal message bus.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Publishes each message as an entry on the Redis stream named after the topic.
#[derive(Clone)]
pub struct RedisStreamBus {
    pool: Pool,
}

impl RedisStreamBus {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BusPublisher for RedisStreamBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut conn = self.pool.get().await.map_err(|e| {
            error!(error = %e, topic = %topic, "Failed to get Redis connection for publish");
            PublishError::Connection(e.to_string())
        })?;

        let published_at = chrono::Utc::now().to_rfc3339();

        let id: String = cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(TOPIC_MAX_LEN)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .arg("publishedAt")
            .arg(&published_at)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, topic = %topic, "Failed to publish to Redis stream");
                PublishError::Command(e.to_string())
            })?;

        debug!(topic = %topic, id = %id, "Published message");
        Ok(())
    }
}

/// A message captured by [`InMemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Bus that keeps published messages in memory.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BusPublisher for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        messages.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        debug!(topic = %topic, bytes = payload.len(), "Published message in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_bus_records_messages() {
        let bus = InMemoryBus::new();

        bus.publish("events.github", b"{\"a\":1}").await.unwrap();
        bus.publish("dlq", b"{}").await.unwrap();

        let messages = bus.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "events.github");
        assert_eq!(messages[0].payload, b"{\"a\":1}");
        assert_eq!(messages[1].topic, "dlq");
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError::Command("NOSCRIPT".to_string());
        assert_eq!(err.to_string(), "bus command error: NOSCRIPT");
    }
}
