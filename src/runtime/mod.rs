// SPDX-License-Identifier: MIT OR Apache-2.0

//! Convergence primitives: outcome classification, deadline-bounded retry,
//! status polling and asynchronous task tracking.
//!
//! None of these spawn background work. Every loop is an `async fn` that
//! suspends the caller on `tokio::time::sleep` and stops at its deadline.

mod backoff;
mod classify;
mod poll;
mod retry;
mod span;
mod task;

pub use backoff::{BackoffStrategy, ExponentialBackoff, FixedBackoff, LinearBackoff, NoBackoff};
pub use classify::{
    classify, classify_result, ClassifyError, ErrorKind, Outcome, RetryHints,
    DEFAULT_RETRYABLE_CODES,
};
pub use poll::{Observation, Poller, StatusClass, StatusPartition, StatusSet};
pub use retry::{
    retry, RetryPolicy, RetryPolicyBuilder, DEFAULT_READ_DEADLINE, DEFAULT_WRITE_DEADLINE,
};
pub use span::{OperationKind, OperationSpan};
pub use task::{Submission, TaskOutcome, TaskPartition, TaskState, TaskTracker};
