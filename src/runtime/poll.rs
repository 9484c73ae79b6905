// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polling until a remote resource reaches a terminal status.
//!
//! A [`StatusSet`] partitions every status a resource type can report into
//! pending, success and failure. The [`Poller`] queries the status until it
//! lands in success or failure, or the deadline expires. A status outside the
//! partition stops the poll immediately: an unanticipated remote state must
//! never turn into an endless wait.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::error::RemoteError;
//! use cloud_reconcile::runtime::{Observation, Poller, StatusSet};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cloud_reconcile::error::Result<()> {
//! let running: StatusSet = StatusSet::new()
//!     .pending(["PENDING", "LAUNCHING"])
//!     .success(["RUNNING"])
//!     .failure(["LAUNCH_FAILED"]);
//!
//! let poller = Poller::new(Duration::from_secs(60)).with_interval(Duration::from_millis(5));
//! let status = poller
//!     .wait_for("wait instance running", &running, || async {
//!         Ok::<_, RemoteError>(Observation::Present("RUNNING".to_string()))
//!     })
//!     .await?;
//! assert_eq!(status.into_status().as_deref(), Some("RUNNING"));
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use super::backoff::{BackoffStrategy, FixedBackoff};
use super::classify::{classify, ClassifyError, Outcome, RetryHints};
use super::span::{OperationKind, OperationSpan};
use crate::error::{BoxError, ReconcileError, Result};

/// Where an observed status falls in a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Keep polling.
    Pending,
    /// Stop, the wait succeeded.
    Success,
    /// Stop, the remote side reported a terminal failure.
    Failure,
    /// The status is not part of the partition.
    Unknown,
}

/// One poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation<S> {
    /// The resource was found with this status.
    Present(S),
    /// The resource was not found.
    Absent,
}

impl<S> Observation<S> {
    /// The observed status, if the resource was present.
    pub fn into_status(self) -> Option<S> {
        match self {
            Observation::Present(status) => Some(status),
            Observation::Absent => None,
        }
    }

    /// Whether the resource was absent.
    pub fn is_absent(&self) -> bool {
        matches!(self, Observation::Absent)
    }
}

impl<S> From<Option<S>> for Observation<S> {
    fn from(status: Option<S>) -> Self {
        match status {
            Some(status) => Observation::Present(status),
            None => Observation::Absent,
        }
    }
}

/// Maps observed statuses to a [`StatusClass`].
///
/// Implemented by [`StatusSet`] for plain status values and by
/// [`TaskPartition`](super::TaskPartition) for task states.
pub trait StatusPartition<S> {
    /// Classify a present status.
    fn classify(&self, status: &S) -> StatusClass;

    /// Classification of an absent resource. Pending by default, so a
    /// resource that is not yet visible after creation keeps the poll going.
    fn absent(&self) -> StatusClass {
        StatusClass::Pending
    }
}

/// Caller-declared partition of remote statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSet<S: Eq + Hash = String> {
    pending: HashSet<S>,
    success: HashSet<S>,
    failure: HashSet<S>,
    absent: StatusClass,
}

impl<S: Eq + Hash> Default for StatusSet<S> {
    fn default() -> Self {
        Self {
            pending: HashSet::new(),
            success: HashSet::new(),
            failure: HashSet::new(),
            absent: StatusClass::Pending,
        }
    }
}

impl<S: Eq + Hash> StatusSet<S> {
    /// Empty partition; an absent resource counts as pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add statuses that keep the poll going.
    #[must_use]
    pub fn pending<I, T>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<S>,
    {
        self.pending.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Add statuses that end the poll successfully.
    #[must_use]
    pub fn success<I, T>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<S>,
    {
        self.success.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Add statuses that end the poll with a failure.
    #[must_use]
    pub fn failure<I, T>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<S>,
    {
        self.failure.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Set how an absent resource is classified.
    ///
    /// Deletion waits use [`StatusClass::Success`]: not found means gone.
    #[must_use]
    pub fn when_absent(mut self, class: StatusClass) -> Self {
        self.absent = class;
        self
    }
}

impl<S: Eq + Hash> StatusPartition<S> for StatusSet<S> {
    fn classify(&self, status: &S) -> StatusClass {
        if self.success.contains(status) {
            StatusClass::Success
        } else if self.failure.contains(status) {
            StatusClass::Failure
        } else if self.pending.contains(status) {
            StatusClass::Pending
        } else {
            StatusClass::Unknown
        }
    }

    fn absent(&self) -> StatusClass {
        self.absent
    }
}

/// Polls a status query until a terminal status or the deadline.
#[derive(Debug, Clone)]
pub struct Poller<B: BackoffStrategy = FixedBackoff> {
    deadline: Duration,
    interval: B,
    delay: Duration,
    hints: RetryHints,
    not_found_checks: Option<u32>,
}

impl Poller {
    /// Poller with a one second interval and default hints.
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            interval: FixedBackoff::default(),
            delay: Duration::ZERO,
            hints: RetryHints::default(),
            not_found_checks: None,
        }
    }

    /// Use a fixed interval between polls.
    #[must_use]
    pub fn with_interval(self, interval: Duration) -> Self {
        self.with_backoff(FixedBackoff::new(interval))
    }
}

impl<B: BackoffStrategy> Poller<B> {
    /// Use a custom backoff between polls.
    #[must_use]
    pub fn with_backoff<B2: BackoffStrategy>(self, interval: B2) -> Poller<B2> {
        Poller {
            deadline: self.deadline,
            interval,
            delay: self.delay,
            hints: self.hints,
            not_found_checks: self.not_found_checks,
        }
    }

    /// Set the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Wait this long before the first query.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set which query errors keep the poll going.
    #[must_use]
    pub fn with_hints(mut self, hints: RetryHints) -> Self {
        self.hints = hints;
        self
    }

    /// Give up after this many consecutive absent observations when absence
    /// counts as pending. A present status or a transient query error in
    /// between restarts the count.
    #[must_use]
    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = Some(checks);
        self
    }

    /// Configured deadline.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Query until the partition reports success or failure.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::FailureStatus`] when a failure status is observed.
    /// - [`ReconcileError::UnknownStatus`] on the first status outside the
    ///   partition.
    /// - [`ReconcileError::NeverAppeared`] when the not-found check limit is hit.
    /// - [`ReconcileError::Fatal`] when the query fails with a non-retryable
    ///   error.
    /// - [`ReconcileError::DeadlineExceeded`] with the last observed status.
    pub async fn wait_for<S, P, E, F, Fut>(
        &self,
        operation: &str,
        partition: &P,
        mut query: F,
    ) -> Result<Observation<S>>
    where
        S: fmt::Display,
        P: StatusPartition<S> + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Observation<S>, E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        let span = OperationSpan::new(OperationKind::Poll, operation);
        let start = Instant::now();

        async {
            let mut polls: u32 = 0;
            let mut absent_streak: u32 = 0;
            let mut last_status: Option<String> = None;

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay.min(self.deadline)).await;
            }

            loop {
                polls += 1;
                let mut last_error: Option<BoxError> = None;

                match query().await {
                    Ok(observation) => {
                        let (class, shown) = match &observation {
                            Observation::Present(status) => {
                                absent_streak = 0;
                                (partition.classify(status), status.to_string())
                            }
                            Observation::Absent => {
                                absent_streak += 1;
                                (partition.absent(), "<absent>".to_string())
                            }
                        };
                        span.record_status(&shown);
                        last_status = Some(shown.clone());

                        match class {
                            StatusClass::Success => {
                                span.record_success(polls);
                                debug!(operation, polls, status = %shown, "poll reached target status");
                                return Ok(observation);
                            }
                            StatusClass::Failure => {
                                let error = ReconcileError::FailureStatus {
                                    operation: operation.to_string(),
                                    status: shown,
                                };
                                span.record_fatal(polls, &error.to_string());
                                return Err(error);
                            }
                            StatusClass::Unknown => {
                                let error = ReconcileError::UnknownStatus {
                                    operation: operation.to_string(),
                                    status: shown,
                                };
                                span.record_fatal(polls, &error.to_string());
                                return Err(error);
                            }
                            StatusClass::Pending => {
                                if observation.is_absent() {
                                    if let Some(limit) = self.not_found_checks {
                                        if absent_streak >= limit {
                                            let error = ReconcileError::NeverAppeared {
                                                operation: operation.to_string(),
                                                checks: absent_streak,
                                            };
                                            span.record_fatal(polls, &error.to_string());
                                            return Err(error);
                                        }
                                    }
                                }
                                debug!(operation, polls, status = %shown, "still pending");
                            }
                        }
                    }
                    Err(err) => match classify(Some(&err), &self.hints) {
                        Outcome::Retryable(reason) => {
                            debug!(operation, polls, %reason, "status query failed transiently");
                            absent_streak = 0;
                            last_error = Some(Box::new(err) as BoxError);
                        }
                        Outcome::Success | Outcome::Fatal(_) => {
                            span.record_fatal(polls, &err.to_string());
                            return Err(ReconcileError::Fatal {
                                operation: operation.to_string(),
                                source: Box::new(err),
                            });
                        }
                    },
                }

                let elapsed = start.elapsed();
                if elapsed >= self.deadline {
                    let error = ReconcileError::DeadlineExceeded {
                        operation: operation.to_string(),
                        deadline: self.deadline,
                        attempts: polls,
                        last_status,
                        last_error,
                    };
                    span.record_deadline(polls, &error.to_string());
                    warn!(operation, polls, "poll deadline exceeded");
                    return Err(error);
                }

                let delay = self
                    .interval
                    .delay(polls - 1)
                    .min(self.deadline - elapsed);
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(span.span().clone())
        .await
    }
}
