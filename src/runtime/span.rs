// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracing spans for retried and polled operations.
//!
//! Every [`RetryPolicy::execute`](super::RetryPolicy::execute) and
//! [`Poller::wait_for`](super::Poller::wait_for) call runs inside an
//! [`OperationSpan`], so a subscriber sees one span per convergence step with
//! the number of attempts and the final outcome attached.
//!
//! | Field | Description |
//! |-------|-------------|
//! | `reconcile.kind` | `retry` or `poll` |
//! | `reconcile.operation` | Caller-supplied operation name |
//! | `reconcile.attempts` | Calls made before the span closed |
//! | `reconcile.outcome` | `success`, `fatal` or `deadline_exceeded` |
//! | `reconcile.last_status` | Last observed remote status (polls only) |
//! | `error.message` | Surfaced error, if any |
//! | `duration_ms` | Wall time of the whole step |

use tokio::time::Instant;
use tracing::{field, info_span, Span};

/// Which convergence primitive a span belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A call wrapped by the retry executor.
    Retry,
    /// A status or task poll loop.
    Poll,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            OperationKind::Retry => "retry",
            OperationKind::Poll => "poll",
        }
    }
}

/// A span covering one retried or polled operation.
#[derive(Debug)]
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: String,
}

impl OperationSpan {
    /// Open a span for the given operation.
    pub fn new(kind: OperationKind, operation: &str) -> Self {
        let span = info_span!(
            "reconcile.operation",
            reconcile.kind = kind.as_str(),
            reconcile.operation = %operation,
            reconcile.attempts = field::Empty,
            reconcile.outcome = field::Empty,
            reconcile.last_status = field::Empty,
            error.message = field::Empty,
            duration_ms = field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            operation: operation.to_string(),
        }
    }

    /// The underlying `tracing::Span`, for `Instrument`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Record the last observed remote status.
    pub fn record_status(&self, status: &str) {
        self.span.record("reconcile.last_status", status);
    }

    /// Record a successful completion.
    pub fn record_success(&self, attempts: u32) {
        self.finish(attempts, "success");
    }

    /// Record a permanent failure.
    pub fn record_fatal(&self, attempts: u32, error: &str) {
        self.span.record("error.message", error);
        self.finish(attempts, "fatal");
    }

    /// Record that the deadline expired.
    pub fn record_deadline(&self, attempts: u32, error: &str) {
        self.span.record("error.message", error);
        self.finish(attempts, "deadline_exceeded");
    }

    fn finish(&self, attempts: u32, outcome: &'static str) {
        self.span.record("reconcile.attempts", attempts);
        self.span.record("reconcile.outcome", outcome);
        self.span
            .record("duration_ms", self.start.elapsed().as_millis() as i64);
    }
}
