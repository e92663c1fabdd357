//! Result publishing.
//!
//! Results go to a stream reserved for this worker's output. Only the
//! downstream bridge reads it, through a single consumer group, so every
//! record reaches exactly one consumer instead of being round-robined with
//! unrelated consumers of a shared queue.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use librend_models::FinalizedRecord;

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueConfig, BODY_FIELD, CORRELATION_FIELD};

/// Producer side of the outbound result stream.
pub struct ResultQueue {
    conn: MultiplexedConnection,
    stream: String,
}

impl ResultQueue {
    /// Connect to Redis with its own connection, separate from the consumer.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("{}: {}", config.redis_url, e)))?;

        Ok(Self {
            conn,
            stream: config.result_stream.clone(),
        })
    }

    /// Publish a finalized record keyed by its correlation id.
    pub async fn publish(&self, record: &FinalizedRecord) -> QueueResult<String> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg(CORRELATION_FIELD)
            .arg(record.correlation_id.as_str())
            .arg(BODY_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(format!("{}: {}", self.stream, e)))?;

        info!(
            correlation_id = %record.correlation_id,
            "Published result to {} as {}", self.stream, message_id
        );
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
        let len: u64 = conn.xlen(&self.stream).await?;
        Ok(len)
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}
