//! Segment executor.
//!
//! Reads one delivery at a time, classifies it, offers it to the session
//! controller and settles it with the broker: admitted segments are
//! acknowledged, everything else is requeued for later redelivery. A
//! completed session is rendered inline, so no segment is read while a
//! render is in progress.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use librend_models::Segment;
use librend_queue::{Delivery, QueueResult, SegmentQueue};

use crate::controller::{log_admission, RenderBackend, RenderSessionController, ResultPublisher};
use crate::error::WorkerResult;
use crate::keepalive::{spawn_keepalive, KeepAliveTarget};
use crate::metrics;
use crate::session::{Admission, RejectReason};

/// Back-off after a broker read error.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Inbound side of the broker as seen by the executor.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    async fn init(&self) -> QueueResult<()>;

    async fn next_delivery(&self, consumer_name: &str) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()>;
}

#[async_trait]
impl DeliverySource for SegmentQueue {
    async fn init(&self) -> QueueResult<()> {
        SegmentQueue::init(self).await
    }

    async fn next_delivery(&self, consumer_name: &str) -> QueueResult<Option<Delivery>> {
        SegmentQueue::next_delivery(self, consumer_name).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        SegmentQueue::ack(self, message_id).await
    }

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        SegmentQueue::requeue(self, delivery).await.map(|_| ())
    }
}

/// Single-session executor over an inbound delivery source.
pub struct RenderExecutor<S: DeliverySource, B: RenderBackend, P: ResultPublisher> {
    source: Arc<S>,
    controller: RenderSessionController<B, P>,
    requeue_backoff: Duration,
    keepalive_targets: Vec<Arc<dyn KeepAliveTarget>>,
    keepalive_interval: Duration,
    consumer_name: String,
}

impl<S: DeliverySource, B: RenderBackend, P: ResultPublisher> RenderExecutor<S, B, P> {
    pub fn new(source: Arc<S>, controller: RenderSessionController<B, P>, requeue_backoff: Duration) -> Self {
        Self {
            source,
            controller,
            requeue_backoff,
            keepalive_targets: Vec::new(),
            keepalive_interval: Duration::from_secs(30),
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    /// Keep these broker connections alive while running.
    pub fn with_keepalive(mut self, targets: Vec<Arc<dyn KeepAliveTarget>>, interval: Duration) -> Self {
        self.keepalive_targets = targets;
        self.keepalive_interval = interval;
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn controller(&self) -> &RenderSessionController<B, P> {
        &self.controller
    }

    /// Consume until `shutdown` flips to `true` or a render fails.
    ///
    /// A render failure is returned as is and is fatal to the worker.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!("Starting render executor '{}'", self.consumer_name);
        self.source.init().await?;

        let (keepalive_stop, keepalive_rx) = watch::channel(false);
        let keepalive = (!self.keepalive_targets.is_empty()).then(|| {
            spawn_keepalive(
                self.keepalive_targets.clone(),
                self.keepalive_interval,
                keepalive_rx,
            )
        });

        let result = self.consume(&mut shutdown).await;

        let _ = keepalive_stop.send(true);
        if let Some(handle) = keepalive {
            if let Err(e) = handle.await {
                warn!("Keep-alive task ended abnormally: {}", e);
            }
        }

        info!("Render executor stopped");
        result
    }

    async fn consume(&mut self, shutdown: &mut watch::Receiver<bool>) -> WorkerResult<()> {
        loop {
            if *shutdown.borrow() {
                info!("Shutdown signal received, stopping executor");
                return Ok(());
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                next = self.source.next_delivery(&self.consumer_name) => next,
            };

            match next {
                Ok(Some(delivery)) => self.handle_delivery(delivery).await?,
                Ok(None) => {}
                Err(e) => {
                    error!("Error consuming segments: {}", e);
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Classify, admit and settle one delivery.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> WorkerResult<()> {
        let segment = match Segment::parse(delivery.correlation_id.as_deref(), delivery.body_str()) {
            Ok(segment) => segment,
            Err(e) => {
                let reason = RejectReason::MalformedInput(e.to_string());
                metrics::record_segment_rejected(reason.label());
                warn!(message_id = %delivery.message_id, "Requeueing delivery: {}", reason);
                self.requeue(&delivery).await;
                return Ok(());
            }
        };

        let correlation_id = segment.correlation_id.clone();
        let admission = self.controller.admit(segment);
        log_admission(&correlation_id, &admission);

        match admission {
            Admission::Accepted => self.ack(&delivery).await,
            Admission::Completed(session) => {
                // Acknowledged before rendering: a crash mid-render loses the request.
                self.ack(&delivery).await;
                self.controller.finalize(session).await?;
            }
            Admission::Rejected(_) => self.requeue(&delivery).await,
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.source.ack(&delivery.message_id).await {
            warn!(message_id = %delivery.message_id, "Failed to ack segment: {}", e);
        }
    }

    async fn requeue(&self, delivery: &Delivery) {
        match self.source.requeue(delivery).await {
            Ok(()) => debug!(message_id = %delivery.message_id, "Segment requeued"),
            Err(e) => error!(message_id = %delivery.message_id, "Failed to requeue segment: {}", e),
        }
        tokio::time::sleep(self.requeue_backoff).await;
    }
}
