// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use thiserror::Error;

use crate::identity::TaskHandle;
use crate::reconcile::ElementOp;

/// Boxed error carried as the cause of a surfaced failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the reconciliation core.
///
/// Retryable remote errors never appear here directly: they are absorbed by the
/// retry executor and the poller until a deadline expires, at which point they
/// show up as the cause of [`ReconcileError::DeadlineExceeded`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("{operation} failed: {source}")]
    Fatal {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} reached failure status `{status}`")]
    FailureStatus { operation: String, status: String },

    #[error("{operation} observed unrecognized status `{status}`")]
    UnknownStatus { operation: String, status: String },

    #[error("{operation} never became visible after {checks} consecutive not-found checks")]
    NeverAppeared { operation: String, checks: u32 },

    #[error(
        "{operation} exceeded its {deadline:?} deadline after {attempts} attempt(s){}",
        last_known(.last_status, .last_error)
    )]
    DeadlineExceeded {
        operation: String,
        deadline: Duration,
        attempts: u32,
        last_status: Option<String>,
        #[source]
        last_error: Option<BoxError>,
    },

    #[error("task {handle} failed: {reason}")]
    TaskFailed { handle: TaskHandle, reason: String },

    #[error("{op} of element {element} failed: {source}")]
    ElementFailed {
        element: String,
        op: ElementOp,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("{operation} returned no resource identity")]
    MissingIdentity { operation: String },

    #[error("lease for `{held}` does not cover resource `{requested}`")]
    LeaseMismatch { held: String, requested: String },

    #[error("illegal lifecycle transition for {resource}: {from} -> {to}")]
    IllegalTransition {
        resource: String,
        from: String,
        to: String,
    },
}

fn last_known(status: &Option<String>, error: &Option<BoxError>) -> String {
    match (status, error) {
        (Some(status), Some(error)) => format!(" (last status `{status}`, last error: {error})"),
        (Some(status), None) => format!(" (last status `{status}`)"),
        (None, Some(error)) => format!(" (last error: {error})"),
        (None, None) => String::new(),
    }
}

impl ReconcileError {
    /// Returns `true` if the call stopped waiting rather than failing outright.
    ///
    /// A deadline error means the remote operation may still succeed.
    #[must_use]
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded { .. } => true,
            Self::ElementFailed { source, .. } => source.is_deadline_exceeded(),
            _ => false,
        }
    }

    /// Returns `true` if the remote side reported a terminal failure for the
    /// resource or one of its tasks.
    #[must_use]
    pub fn is_remote_failure(&self) -> bool {
        match self {
            Self::FailureStatus { .. } | Self::TaskFailed { .. } => true,
            Self::ElementFailed { source, .. } => source.is_remote_failure(),
            _ => false,
        }
    }

    /// Last remote status observed before the error, if any.
    #[must_use]
    pub fn last_status(&self) -> Option<&str> {
        match self {
            Self::FailureStatus { status, .. } | Self::UnknownStatus { status, .. } => {
                Some(status)
            }
            Self::DeadlineExceeded { last_status, .. } => last_status.as_deref(),
            Self::ElementFailed { source, .. } => source.last_status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// A ready-made error type for [`RemoteClient`](crate::lifecycle::RemoteClient)
/// implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("[{code}] {message}{}", request_suffix(.request_id))]
    Api {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

fn request_suffix(request_id: &Option<String>) -> String {
    request_id
        .as_ref()
        .map(|id| format!(" (request id {id})"))
        .unwrap_or_default()
}

impl RemoteError {
    /// Create an API error with the given code and message.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    /// Attach the remote request id to an API error.
    #[must_use]
    pub fn with_request_id(self, id: impl Into<String>) -> Self {
        match self {
            Self::Api { code, message, .. } => Self::Api {
                code,
                message,
                request_id: Some(id.into()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_message_carries_last_status() {
        let err = ReconcileError::DeadlineExceeded {
            operation: "wait ready".to_string(),
            deadline: Duration::from_secs(10),
            attempts: 4,
            last_status: Some("CREATING".to_string()),
            last_error: None,
        };

        let msg = err.to_string();
        assert!(msg.contains("wait ready"));
        assert!(msg.contains("4 attempt(s)"));
        assert!(msg.contains("CREATING"));
        assert!(err.is_deadline_exceeded());
        assert_eq!(err.last_status(), Some("CREATING"));
    }

    #[test]
    fn test_deadline_keeps_last_error_as_source() {
        let err = ReconcileError::DeadlineExceeded {
            operation: "modify".to_string(),
            deadline: Duration::from_secs(1),
            attempts: 2,
            last_status: None,
            last_error: Some(Box::new(RemoteError::api("ResourceInUse", "busy")) as BoxError),
        };

        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("ResourceInUse"));
    }

    #[test]
    fn test_element_failure_is_remote_failure_when_cause_is() {
        let err = ReconcileError::ElementFailed {
            element: "\"sg-1\"".to_string(),
            op: ElementOp::Add,
            source: Box::new(ReconcileError::FailureStatus {
                operation: "bind".to_string(),
                status: "FAILED".to_string(),
            }),
        };

        assert!(err.is_remote_failure());
        assert_eq!(err.last_status(), Some("FAILED"));
        assert!(err.to_string().starts_with("add of element"));
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::api("InternalError", "try later").with_request_id("req-1");
        assert_eq!(err.to_string(), "[InternalError] try later (request id req-1)");
        assert_eq!(
            RemoteError::NotFound("ins-1".to_string()).to_string(),
            "Resource not found: ins-1"
        );
    }
}
