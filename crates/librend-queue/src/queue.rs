//! Segment intake using Redis Streams.
//!
//! Each stream entry carries the correlation id as a separate field (the
//! message's correlation metadata) next to the JSON body. Rejected entries
//! are requeued by re-appending them to the stream tail, so another request's
//! segments keep flowing while the active one is rendered.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use librend_models::Segment;

use crate::error::{QueueError, QueueResult};

/// Stream field holding the correlation id.
pub const CORRELATION_FIELD: &str = "correlation_id";
/// Stream field holding the JSON body.
pub const BODY_FIELD: &str = "body";
/// Stream field holding the redelivery counter.
pub const ATTEMPT_FIELD: &str = "attempt";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Inbound segment stream
    pub segment_stream: String,
    /// Consumer group reading the segment stream
    pub consumer_group: String,
    /// Outbound stream reserved for rendered results
    pub result_stream: String,
    /// How long a read blocks waiting for a segment
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            segment_stream: "translations".to_string(),
            consumer_group: "renderer".to_string(),
            result_stream: "libras-bridge".to_string(),
            block_timeout: Duration::from_millis(1000),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            segment_stream: std::env::var("SEGMENT_STREAM")
                .unwrap_or_else(|_| "translations".to_string()),
            consumer_group: std::env::var("SEGMENT_CONSUMER_GROUP")
                .unwrap_or_else(|_| "renderer".to_string()),
            result_stream: std::env::var("RESULT_STREAM")
                .unwrap_or_else(|_| "libras-bridge".to_string()),
            block_timeout: Duration::from_millis(
                std::env::var("QUEUE_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}

/// A segment message read from the stream, not yet classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry ID
    pub message_id: String,
    /// Correlation metadata, if present
    pub correlation_id: Option<String>,
    /// Raw JSON body, if present
    pub body: Option<String>,
    /// How many times this message has been requeued
    pub attempt: u32,
}

impl Delivery {
    /// Body as text; a missing body reads as empty and fails classification.
    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }
}

/// Consumer side of the inbound segment stream.
pub struct SegmentQueue {
    conn: MultiplexedConnection,
    config: QueueConfig,
}

impl SegmentQueue {
    /// Connect to Redis.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("{}: {}", config.redis_url, e)))?;
        Ok(Self { conn, config })
    }

    /// Initialize the stream and consumer group.
    ///
    /// The group starts at id `0` so segments queued before the worker
    /// came up are still consumed.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.segment_stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Read the next delivery, blocking up to the configured timeout.
    pub async fn next_delivery(&self, consumer_name: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn.clone();

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.segment_stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let delivery = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next()
            .map(|entry| Delivery {
                correlation_id: entry.get(CORRELATION_FIELD),
                body: entry.get(BODY_FIELD),
                attempt: entry.get(ATTEMPT_FIELD).unwrap_or(0),
                message_id: entry.id,
            });

        if let Some(delivery) = &delivery {
            debug!(
                message_id = %delivery.message_id,
                attempt = delivery.attempt,
                "Consumed segment delivery"
            );
        }

        Ok(delivery)
    }

    /// Acknowledge and delete a delivery.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.config.segment_stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.segment_stream)
            .arg(message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged segment: {}", message_id);
        Ok(())
    }

    /// Put a delivery back at the tail of the stream for later redelivery.
    ///
    /// The copy and the removal of the original happen in one transaction.
    pub async fn requeue(&self, delivery: &Delivery) -> QueueResult<String> {
        let mut conn = self.conn.clone();

        let mut xadd = redis::cmd("XADD");
        xadd.arg(&self.config.segment_stream).arg("*");
        if let Some(correlation_id) = &delivery.correlation_id {
            xadd.arg(CORRELATION_FIELD).arg(correlation_id);
        }
        if let Some(body) = &delivery.body {
            xadd.arg(BODY_FIELD).arg(body);
        }
        xadd.arg(ATTEMPT_FIELD).arg(delivery.attempt.saturating_add(1));

        let (new_id,): (String,) = redis::pipe()
            .atomic()
            .add_command(xadd)
            .cmd("XACK")
            .arg(&self.config.segment_stream)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.segment_stream)
            .arg(&delivery.message_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(
            "Requeued segment {} as {} (attempt {})",
            delivery.message_id,
            new_id,
            delivery.attempt + 1
        );
        Ok(new_id)
    }

    /// Append a segment to the stream.
    pub async fn enqueue(&self, segment: &Segment) -> QueueResult<String> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(&segment.body)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.segment_stream)
            .arg("*")
            .arg(CORRELATION_FIELD)
            .arg(segment.correlation_id.as_str())
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await?;

        Ok(message_id)
    }

    /// Round-trip the connection so the broker does not drop it as idle.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Get stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.config.segment_stream).await?;
        Ok(len)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_dedicated_result_stream() {
        let config = QueueConfig::default();
        assert_eq!(config.segment_stream, "translations");
        assert_eq!(config.result_stream, "libras-bridge");
        assert_ne!(config.segment_stream, config.result_stream);
    }

    #[test]
    fn missing_body_reads_as_empty() {
        let delivery = Delivery {
            message_id: "1-0".to_string(),
            correlation_id: Some("abc".to_string()),
            body: None,
            attempt: 0,
        };
        assert_eq!(delivery.body_str(), "");
    }
}
