//! Paced socket protocol spoken to the synthesis process.
//!
//! Each item is written as `<text>#<value>` in UTF-8 with no length prefix
//! or terminator: gloss items carry their presentation timestamp, the
//! terminal item carries the total segment count. Item boundaries are
//! implied by a fixed pause after every write, which is also the rate at
//! which the synthesis process plays them.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info};

use librend_models::{Segment, SegmentPayload};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_fixed, RetryPolicy, RetryResult};

/// Separator between the item text and its value.
pub const ITEM_SEPARATOR: char = '#';

/// Synthesis socket settings.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Address the synthesis process listens on
    pub addr: String,
    /// Pause after every item
    pub item_interval: Duration,
    /// Fixed delay between connection attempts
    pub connect_retry: Duration,
    /// Connection attempt ceiling; `None` retries forever
    pub connect_attempts: Option<u32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5555".to_string(),
            item_interval: Duration::from_millis(500),
            connect_retry: Duration::from_secs(2),
            connect_attempts: None,
        }
    }
}

/// Encode one segment as it goes on the wire.
pub fn encode_item(segment: &Segment) -> String {
    match &segment.payload {
        SegmentPayload::GlossText { gloss, pts } => {
            format!("{}{}{}", gloss, ITEM_SEPARATOR, pts)
        }
        SegmentPayload::Control {
            marker,
            total_count,
        } => format!("{}{}{}", marker, ITEM_SEPARATOR, total_count),
    }
}

/// Client streaming a sorted session to the synthesis process.
#[derive(Debug, Clone)]
pub struct ProtocolClient {
    config: ProtocolConfig,
}

impl ProtocolClient {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Dial the synthesis socket, retrying on a fixed delay.
    pub async fn connect(&self) -> WorkerResult<TcpStream> {
        let policy = RetryPolicy::forever("synthesis connect", self.config.connect_retry)
            .with_max_attempts(self.config.connect_attempts);
        let addr = self.config.addr.as_str();

        match retry_fixed(&policy, || TcpStream::connect(addr)).await {
            RetryResult::Success(stream) => {
                debug!(addr, "Connected to synthesis process");
                Ok(stream)
            }
            RetryResult::Failed { error, attempts } => {
                debug!(addr, attempts, "Giving up on synthesis socket: {}", error);
                Err(WorkerError::ConnectFailed {
                    addr: self.config.addr.clone(),
                    attempts,
                })
            }
        }
    }

    /// Send `segments` in order, pausing after each one.
    ///
    /// `terminal_reached` fires right after the terminal control item has
    /// been written, so capture can start while the pacing continues. The
    /// connection is closed once the last pause has elapsed.
    pub async fn stream(
        &self,
        segments: &[Segment],
        terminal_reached: oneshot::Sender<()>,
    ) -> WorkerResult<()> {
        let mut socket = self.connect().await?;
        let mut terminal_reached = Some(terminal_reached);

        info!(items = segments.len(), "Streaming segments to synthesis process");
        for segment in segments {
            let item = encode_item(segment);
            socket
                .write_all(item.as_bytes())
                .await
                .map_err(|e| WorkerError::protocol(format!("write of item {} failed: {}", segment.index, e)))?;

            if segment.finalize_total().is_some() {
                debug!(item = %item, "Sent terminal item");
                if let Some(tx) = terminal_reached.take() {
                    // Receiver gone means the render was abandoned.
                    let _ = tx.send(());
                }
            }

            tokio::time::sleep(self.config.item_interval).await;
        }

        if let Err(e) = socket.shutdown().await {
            debug!("Synthesis socket shutdown: {}", e);
        }

        if terminal_reached.is_some() {
            return Err(WorkerError::protocol("segment run has no terminal item"));
        }
        Ok(())
    }
}
