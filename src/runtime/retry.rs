// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deadline-bounded retry of idempotent remote calls.
//!
//! The executor runs an operation until it succeeds, fails permanently, or the
//! policy's deadline expires. Transient failures are classified by
//! [`classify`](super::classify) using the policy's [`RetryHints`] and never
//! reach the caller unless the deadline runs out.
//!
//! The wrapped operation may run several times, so it must be idempotent on
//! the remote side: pure reads, or submissions that the remote API
//! deduplicates.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::error::RemoteError;
//! use cloud_reconcile::runtime::{FixedBackoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cloud_reconcile::error::Result<()> {
//! let policy = RetryPolicy::builder()
//!     .deadline(Duration::from_secs(30))
//!     .backoff(FixedBackoff::from_millis(10))
//!     .build();
//!
//! let id = policy
//!     .execute("describe instance", || async { Ok::<_, RemoteError>("ins-1") })
//!     .await?;
//! assert_eq!(id, "ins-1");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use super::backoff::{BackoffStrategy, ExponentialBackoff};
use super::classify::{classify, ClassifyError, Outcome, RetryHints};
use super::span::{OperationKind, OperationSpan};
use crate::error::{BoxError, ReconcileError, Result};

/// Default deadline for read-only calls.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(3 * 60);

/// Default deadline for mutating calls.
pub const DEFAULT_WRITE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Deadline, backoff and retryable categories for one retried call.
#[derive(Debug, Clone)]
pub struct RetryPolicy<B: BackoffStrategy = ExponentialBackoff> {
    /// Total time budget for all attempts.
    pub deadline: Duration,
    /// Delay between attempts.
    pub backoff: B,
    /// Which errors are transient.
    pub hints: RetryHints,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::write()
    }
}

impl RetryPolicy {
    /// Policy with the given deadline, default backoff and default hints.
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            backoff: ExponentialBackoff::default(),
            hints: RetryHints::default(),
        }
    }

    /// Default policy for read-only calls.
    #[must_use]
    pub fn read() -> Self {
        Self::new(DEFAULT_READ_DEADLINE)
    }

    /// Default policy for mutating calls.
    #[must_use]
    pub fn write() -> Self {
        Self::new(DEFAULT_WRITE_DEADLINE)
    }

    /// Create a policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder<ExponentialBackoff> {
        RetryPolicyBuilder::new()
    }
}

impl<B: BackoffStrategy> RetryPolicy<B> {
    /// Copy of this policy with a scaled deadline.
    ///
    /// Long-running remote operations are often given a multiple of the
    /// standard read or write deadline.
    #[must_use]
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            deadline: self.deadline.saturating_mul(factor),
            backoff: self.backoff.clone(),
            hints: self.hints.clone(),
        }
    }

    /// Copy of this policy with different hints.
    #[must_use]
    pub fn with_hints(&self, hints: RetryHints) -> Self {
        Self {
            deadline: self.deadline,
            backoff: self.backoff.clone(),
            hints,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the deadline
    /// expires.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Fatal`] on the first non-retryable error; the
    ///   operation is not called again.
    /// - [`ReconcileError::DeadlineExceeded`] carrying the last error once the
    ///   deadline has passed.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        let span = OperationSpan::new(OperationKind::Retry, operation);
        let start = Instant::now();

        async {
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                let err = match op().await {
                    Ok(value) => {
                        span.record_success(attempts);
                        if attempts > 1 {
                            debug!(operation, attempts, "operation succeeded after retries");
                        }
                        return Ok(value);
                    }
                    Err(err) => err,
                };

                let reason = match classify(Some(&err), &self.hints) {
                    Outcome::Retryable(reason) => reason,
                    Outcome::Success | Outcome::Fatal(_) => {
                        span.record_fatal(attempts, &err.to_string());
                        return Err(ReconcileError::Fatal {
                            operation: operation.to_string(),
                            source: Box::new(err),
                        });
                    }
                };

                let elapsed = start.elapsed();
                if elapsed >= self.deadline {
                    let error = ReconcileError::DeadlineExceeded {
                        operation: operation.to_string(),
                        deadline: self.deadline,
                        attempts,
                        last_status: None,
                        last_error: Some(Box::new(err) as BoxError),
                    };
                    span.record_deadline(attempts, &error.to_string());
                    warn!(operation, attempts, "retry deadline exceeded");
                    return Err(error);
                }

                let delay = self
                    .backoff
                    .delay(attempts - 1)
                    .min(self.deadline - elapsed);
                debug!(
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span.span().clone())
        .await
    }
}

/// Run `op` under `policy`. Shorthand for [`RetryPolicy::execute`].
pub async fn retry<B, T, E, F, Fut>(policy: &RetryPolicy<B>, operation: &str, op: F) -> Result<T>
where
    B: BackoffStrategy,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: ClassifyError + std::error::Error + Send + Sync + 'static,
{
    policy.execute(operation, op).await
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder<B: BackoffStrategy> {
    deadline: Duration,
    backoff: B,
    hints: RetryHints,
}

impl RetryPolicyBuilder<ExponentialBackoff> {
    /// Builder with the write deadline, default backoff and default hints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            deadline: DEFAULT_WRITE_DEADLINE,
            backoff: ExponentialBackoff::default(),
            hints: RetryHints::default(),
        }
    }
}

impl Default for RetryPolicyBuilder<ExponentialBackoff> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BackoffStrategy> RetryPolicyBuilder<B> {
    /// Set the total deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn backoff<B2: BackoffStrategy>(self, backoff: B2) -> RetryPolicyBuilder<B2> {
        RetryPolicyBuilder {
            deadline: self.deadline,
            backoff,
            hints: self.hints,
        }
    }

    /// Set the retry hints.
    #[must_use]
    pub fn hints(mut self, hints: RetryHints) -> Self {
        self.hints = hints;
        self
    }

    /// Build the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy<B> {
        RetryPolicy {
            deadline: self.deadline,
            backoff: self.backoff,
            hints: self.hints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::runtime::{FixedBackoff, NoBackoff};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed(deadline: Duration, interval: Duration) -> RetryPolicy<FixedBackoff> {
        RetryPolicy::builder()
            .deadline(deadline)
            .backoff(FixedBackoff::new(interval))
            .build()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(RetryPolicy::read().deadline, Duration::from_secs(180));
        assert_eq!(RetryPolicy::write().deadline, Duration::from_secs(300));
        assert_eq!(
            RetryPolicy::read().scaled(3).deadline,
            Duration::from_secs(540)
        );
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let policy = RetryPolicy::default();
        let value = policy
            .execute("noop", || async { Ok::<_, RemoteError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let policy = fixed(Duration::from_secs(30), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));

        let value = policy
            .execute("flaky", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RemoteError::api("RequestLimitExceeded", "slow down"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let policy = RetryPolicy::builder().backoff(NoBackoff::new()).build();
        let calls = Arc::new(AtomicU32::new(0));

        let err = policy
            .execute("create", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RemoteError::api("InvalidParameter", "bad subnet"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            ReconcileError::Fatal { operation, source } => {
                assert_eq!(operation, "create");
                assert!(source.to_string().contains("InvalidParameter"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_retryable_loop() {
        let deadline = Duration::from_secs(10);
        let interval = Duration::from_secs(3);
        let policy = fixed(deadline, interval);
        let start = Instant::now();

        let err = policy
            .execute("always busy", || async {
                Err::<(), _>(RemoteError::api("ResourceBusy", "busy"))
            })
            .await
            .unwrap_err();

        assert!(start.elapsed() <= deadline + interval);
        match err {
            ReconcileError::DeadlineExceeded {
                attempts,
                last_error,
                ..
            } => {
                // 0s, 3s, 6s, 9s, then a final attempt at 10s.
                assert_eq!(attempts, 5);
                assert!(last_error.unwrap().to_string().contains("ResourceBusy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hints_extend_retryable_set() {
        let policy = RetryPolicy::builder()
            .deadline(Duration::from_secs(5))
            .backoff(FixedBackoff::from_secs(1))
            .hints(RetryHints::transport_only().with_code("UnsupportedOperation"))
            .build();
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry(&policy, "bind", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RemoteError::api("UnsupportedOperation", "pending order"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
