//! Redis Streams source.
//!
//! Every channel is a Redis stream. The source reads all of them through a
//! consumer group, so several relay instances can share the load, and
//! acknowledges each entry once it has been dispatched, whatever the outcome.
//! Failed dispatches are logged and not replayed.
//!
//! Entries are expected to carry the raw event body in a `payload` field:
//!
//! ```text
//! XADD github * payload '{"ref":"refs/heads/master","repository":{"name":"svc"}}'
//! ```

use super::SourceError;
use crate::dispatcher::Dispatcher;
use crate::event::InboundMessage;
use crate::shutdown::ShutdownSignal;
use deadpool_redis::redis::{cmd, FromRedisValue, RedisResult, Value};
use deadpool_redis::{Connection, Pool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Field of a stream entry holding the event body
pub const PAYLOAD_FIELD: &str = "payload";

/// Entries read per XREADGROUP call
const BATCH_SIZE: usize = 10;

/// How long one XREADGROUP call blocks waiting for entries (in milliseconds)
const BLOCK_MS: u64 = 2000;

/// Pause before retrying after the pool fails to hand out a connection
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// `(entry id, raw field list)`; fields are decoded per entry
type StreamEntries = Vec<(String, Value)>;

/// `(stream name, entries)`
type StreamBatch = Vec<(String, StreamEntries)>;

/// Counters reported when the source stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    pub dispatched: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Consumes one Redis stream per channel through a consumer group.
#[derive(Clone)]
pub struct RedisStreamSource {
    pool: Pool,
    channels: Vec<String>,
    consumer_group: String,
    consumer_name: String,
}

impl RedisStreamSource {
    pub fn new(
        pool: Pool,
        channels: Vec<String>,
        consumer_group: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            channels,
            consumer_group: consumer_group.into(),
            consumer_name: consumer_name.into(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Create the consumer group on every channel stream.
    ///
    /// Only new entries are delivered to a freshly created group; there is
    /// no replay of history.
    pub async fn subscribe(&self) -> Result<(), SourceError> {
        let mut conn = self.connection().await?;

        for channel in &self.channels {
            let result: RedisResult<()> = cmd("XGROUP")
                .arg("CREATE")
                .arg(channel)
                .arg(&self.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(()) => info!(
                    channel = %channel,
                    consumer_group = %self.consumer_group,
                    "Created consumer group"
                ),
                Err(e) if e.to_string().contains("BUSYGROUP") => info!(
                    channel = %channel,
                    consumer_group = %self.consumer_group,
                    "Consumer group already exists"
                ),
                Err(e) => {
                    error!(channel = %channel, error = %e, "Failed to create consumer group");
                    return Err(SourceError::Command(e.to_string()));
                }
            }
        }

        info!(
            channels = ?self.channels,
            consumer = %self.consumer_name,
            "Subscribed to channels"
        );
        Ok(())
    }

    /// Read and dispatch messages until shutdown.
    ///
    /// A batch that is already being dispatched when shutdown starts is
    /// finished before returning.
    pub async fn run(&self, dispatcher: Arc<Dispatcher>, shutdown: ShutdownSignal) -> SourceStats {
        let mut stats = SourceStats::default();

        info!(channels = ?self.channels, "Listening for messages");

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let mut conn = match self.connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to get Redis connection");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    }
                }
            };

            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received during read, finishing...");
                    break;
                }
                batch = self.read_batch(&mut conn) => batch,
            };

            match batch {
                Ok(Some(streams)) => {
                    for (channel, entries) in streams {
                        for (id, fields) in entries {
                            self.process(&mut conn, &dispatcher, &channel, &id, fields, &mut stats)
                                .await;
                        }
                    }
                }
                // BLOCK timed out with nothing to read
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Stream read error");
                }
            }
        }

        info!(
            dispatched = stats.dispatched,
            failed = stats.failed,
            skipped = stats.skipped,
            "Redis source stopped"
        );
        stats
    }

    async fn connection(&self) -> Result<Connection, SourceError> {
        self.pool
            .get()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))
    }

    async fn read_batch(&self, conn: &mut Connection) -> RedisResult<Option<StreamBatch>> {
        let ids = vec![">"; self.channels.len()];

        cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(BATCH_SIZE)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(&self.channels)
            .arg(&ids)
            .query_async(conn)
            .await
    }

    async fn process(
        &self,
        conn: &mut Connection,
        dispatcher: &Dispatcher,
        channel: &str,
        id: &str,
        fields: Value,
        stats: &mut SourceStats,
    ) {
        match payload_field(&fields) {
            Some(payload) => {
                let message = InboundMessage::new(channel, payload);
                match dispatcher.dispatch(&message).await {
                    Ok(report) => {
                        stats.dispatched += 1;
                        debug!(
                            id = %id,
                            channel = %channel,
                            outcome = ?report.outcome,
                            "Message processed"
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        error!(id = %id, channel = %channel, error = %e, "Message dispatch failed");
                    }
                }
            }
            None => {
                stats.skipped += 1;
                warn!(
                    id = %id,
                    channel = %channel,
                    "Stream entry has no readable payload field, skipping"
                );
            }
        }

        let ack: RedisResult<u64> = cmd("XACK")
            .arg(channel)
            .arg(&self.consumer_group)
            .arg(id)
            .query_async(conn)
            .await;

        if let Err(e) = ack {
            error!(id = %id, channel = %channel, error = %e, "Failed to ACK message");
        }
    }
}

/// Consumer name for this process: `bridge-<hostname>`, or a random one.
pub fn default_consumer_name() -> String {
    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("bridge-{}", name);
        }
    }

    format!("bridge-{}", uuid::Uuid::new_v4())
}

/// Raw bytes of the entry's payload field. `None` when the field is absent
/// or the entry's field list is malformed.
fn payload_field(fields: &Value) -> Option<Vec<u8>> {
    let fields: Vec<(Vec<u8>, Vec<u8>)> = FromRedisValue::from_redis_value(fields).ok()?;
    fields
        .into_iter()
        .find(|(key, _)| key.as_slice() == PAYLOAD_FIELD.as_bytes())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(bytes: &[u8]) -> Value {
        Value::BulkString(bytes.to_vec())
    }

    fn entry(id: &str, payload: &[u8]) -> Value {
        Value::Array(vec![
            bulk(id.as_bytes()),
            Value::Array(vec![bulk(PAYLOAD_FIELD.as_bytes()), bulk(payload)]),
        ])
    }

    #[test]
    fn test_payload_field() {
        let fields = Value::Array(vec![
            bulk(b"source"),
            bulk(b"github"),
            bulk(b"payload"),
            bulk(br#"{"ref":"x"}"#),
        ]);
        assert_eq!(payload_field(&fields), Some(br#"{"ref":"x"}"#.to_vec()));
    }

    #[test]
    fn test_missing_payload_field() {
        let fields = Value::Array(vec![bulk(b"body"), bulk(b"{}")]);
        assert_eq!(payload_field(&fields), None);
    }

    #[test]
    fn test_malformed_field_list_has_no_payload() {
        assert_eq!(payload_field(&Value::Nil), None);
        assert_eq!(payload_field(&Value::Array(vec![bulk(b"payload")])), None);
    }

    #[test]
    fn test_non_utf8_entry_does_not_spoil_batch() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk(b"github"),
            Value::Array(vec![
                entry("1-0", b"\xff\xfe"),
                entry("2-0", br#"{"ref":"refs/heads/master"}"#),
            ]),
        ])]);

        let batch: Option<StreamBatch> = FromRedisValue::from_redis_value(&reply).unwrap();
        let streams = batch.unwrap();
        assert_eq!(streams.len(), 1);

        let (channel, entries) = &streams[0];
        assert_eq!(channel, "github");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "1-0");
        assert_eq!(payload_field(&entries[0].1), Some(vec![0xff, 0xfe]));
        assert_eq!(
            payload_field(&entries[1].1),
            Some(br#"{"ref":"refs/heads/master"}"#.to_vec())
        );
    }

    #[test]
    fn test_empty_read_is_none() {
        let batch: Option<StreamBatch> = FromRedisValue::from_redis_value(&Value::Nil).unwrap();
        assert!(batch.is_none());
    }

    #[test]
    fn test_default_consumer_name() {
        let name = default_consumer_name();
        assert!(name.starts_with("bridge-"));
        assert!(name.len() > "bridge-".len());
    }

    #[test]
    fn test_source_accessors() {
        let pool = deadpool_redis::Config::from_url("redis://localhost:6379")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        let source = RedisStreamSource::new(
            pool,
            vec!["github".to_string()],
            "webhook_bridge",
            "bridge-test",
        );

        assert_eq!(source.channels(), ["github".to_string()]);
        assert_eq!(source.consumer_name(), "bridge-test");
    }
}
