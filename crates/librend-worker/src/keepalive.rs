//! Broker keep-alive task.
//!
//! Pings the broker connections on a fixed period so idle links are not
//! dropped while a long render holds the consume loop. Never touches
//! session state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use librend_queue::{QueueResult, ResultQueue, SegmentQueue};

use crate::metrics;
use crate::retry::FailureTracker;

/// A connection that can be pinged.
#[async_trait]
pub trait KeepAliveTarget: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ping(&self) -> QueueResult<()>;
}

#[async_trait]
impl KeepAliveTarget for SegmentQueue {
    fn name(&self) -> &'static str {
        "segments"
    }

    async fn ping(&self) -> QueueResult<()> {
        SegmentQueue::ping(self).await
    }
}

#[async_trait]
impl KeepAliveTarget for ResultQueue {
    fn name(&self) -> &'static str {
        "results"
    }

    async fn ping(&self) -> QueueResult<()> {
        ResultQueue::ping(self).await
    }
}

/// Spawn the keep-alive loop; it exits once `shutdown` flips to `true`.
pub fn spawn_keepalive(
    targets: Vec<Arc<dyn KeepAliveTarget>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut trackers: Vec<FailureTracker> =
            targets.iter().map(|_| FailureTracker::new(3)).collect();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let results =
                        futures::future::join_all(targets.iter().map(|target| target.ping())).await;
                    for ((target, tracker), result) in targets.iter().zip(trackers.iter_mut()).zip(results) {
                        match result {
                            Ok(()) => tracker.record_success(),
                            Err(e) => {
                                metrics::record_keepalive_failure(target.name());
                                if tracker.record_failure() {
                                    warn!(target = target.name(), "Keep-alive ping failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        }
        debug!("Keep-alive task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use librend_queue::QueueError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        pings: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl KeepAliveTarget for CountingTarget {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn ping(&self) -> QueueResult<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(QueueError::connection_failed("down"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_pings_every_target_until_shutdown() {
        let healthy = Arc::new(CountingTarget::default());
        let broken = Arc::new(CountingTarget {
            fail: true,
            ..Default::default()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_keepalive(
            vec![
                healthy.clone() as Arc<dyn KeepAliveTarget>,
                broken.clone() as Arc<dyn KeepAliveTarget>,
            ],
            Duration::from_millis(10),
            shutdown_rx,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(healthy.pings.load(Ordering::SeqCst) >= 2);
        assert!(broken.pings.load(Ordering::SeqCst) >= 2);
    }
}
