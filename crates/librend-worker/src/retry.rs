//! Retry utilities.
//!
//! Fixed-delay retry for dialing the synthesis socket, and failure
//! tracking for the broker keep-alive task.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-delay retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay between attempts.
    pub delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn forever(operation_name: impl Into<String>, delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
            operation_name: operation_name.into(),
        }
    }

    /// Stop after `max_attempts` attempts (`None` keeps retrying forever).
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.map(|n| n.max(1));
        self
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed after all retries exhausted.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Execute an async operation until it succeeds or the policy gives up.
pub async fn retry_fixed<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts = attempts.saturating_add(1);
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(error) if policy.exhausted(attempts) => {
                return RetryResult::Failed { error, attempts };
            }
            Err(e) => {
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    policy.operation_name, attempts, policy.delay, e
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by background tasks that run continuously and should suppress
/// log spam after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // 4th failure triggers suppression message (returns false)
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_fixed_eventual_success() {
        let policy = RetryPolicy::forever("test", Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_fixed(&policy, || {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 4 {
                    Err("refused")
                } else {
                    Ok(count)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_fixed_gives_up_at_ceiling() {
        let policy =
            RetryPolicy::forever("test", Duration::from_millis(1)).with_max_attempts(Some(3));
        let calls = AtomicU32::new(0);

        let result = retry_fixed(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("refused") }
        })
        .await;

        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 3),
            RetryResult::Success(_) => panic!("expected failure"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
