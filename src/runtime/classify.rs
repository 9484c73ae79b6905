// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcome classification for remote call results.
//!
//! Every retry and polling decision in this crate goes through [`classify`]:
//! an error is either worth another attempt ([`Outcome::Retryable`]) or ends
//! the call ([`Outcome::Fatal`]). The decision depends only on the error value
//! and the caller's [`RetryHints`], never on elapsed time or attempt count.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::error::RemoteError;
//! use cloud_reconcile::runtime::{classify, Outcome, RetryHints};
//!
//! let hints = RetryHints::default().with_code("FailedOperation.ResourceInOperating");
//!
//! let busy = RemoteError::api("FailedOperation.ResourceInOperating", "locked");
//! assert!(matches!(classify(Some(&busy), &hints), Outcome::Retryable(_)));
//!
//! let invalid = RemoteError::api("InvalidParameter", "bad vpc id");
//! assert!(matches!(classify(Some(&invalid), &hints), Outcome::Fatal(_)));
//! ```

use std::collections::HashSet;

use crate::error::{ReconcileError, RemoteError};

/// Codes every control plane call treats as transient unless told otherwise.
pub const DEFAULT_RETRYABLE_CODES: &[&str] = &[
    "InternalError",
    "RequestLimitExceeded",
    "ResourceInUse",
    "ResourceBusy",
    "ResourceUnavailable",
    "ResourceInsufficient",
    "TradeUnknownError",
    "FailedOperation.ResourceInOperating",
    "OperationDenied.InstanceOperationInProgress",
    "ClientError.NetworkError",
    "ClientError.HttpStatusCodeError",
];

/// Classification of a single call result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded.
    Success,
    /// The call failed transiently and may be attempted again.
    Retryable(String),
    /// The call failed permanently.
    Fatal(String),
}

impl Outcome {
    /// Whether another attempt is allowed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Coarse category of a remote error, as seen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind<'a> {
    /// The request never reached the control plane or the response was lost.
    Transport,
    /// The control plane answered with a structured error code.
    Api {
        /// Vendor error code, e.g. `ResourceInUse`.
        code: &'a str,
    },
    /// The addressed resource does not exist (yet, or any more).
    NotFound,
    /// Anything else.
    Other,
}

/// Exposes the category of an error to the classifier.
pub trait ClassifyError {
    /// Category used to decide between retrying and failing.
    fn error_kind(&self) -> ErrorKind<'_>;
}

impl ClassifyError for RemoteError {
    fn error_kind(&self) -> ErrorKind<'_> {
        match self {
            RemoteError::Transport(_) => ErrorKind::Transport,
            RemoteError::Api { code, .. } => ErrorKind::Api { code },
            RemoteError::NotFound(_) => ErrorKind::NotFound,
            RemoteError::Other(_) => ErrorKind::Other,
        }
    }
}

impl ClassifyError for std::io::Error {
    fn error_kind(&self) -> ErrorKind<'_> {
        match self.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Transport,
        }
    }
}

// Errors already produced by this crate are final: a nested deadline or
// failure status must not be retried by an outer executor.
impl ClassifyError for ReconcileError {
    fn error_kind(&self) -> ErrorKind<'_> {
        ErrorKind::Other
    }
}

/// Caller-declared error categories that should be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryHints {
    codes: HashSet<String>,
    code_families: Vec<String>,
    retry_not_found: bool,
}

impl Default for RetryHints {
    fn default() -> Self {
        Self {
            codes: DEFAULT_RETRYABLE_CODES
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            code_families: Vec::new(),
            retry_not_found: false,
        }
    }
}

impl RetryHints {
    /// Hints with the default retryable code set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hints that retry transport errors only.
    #[must_use]
    pub fn transport_only() -> Self {
        Self {
            codes: HashSet::new(),
            code_families: Vec::new(),
            retry_not_found: false,
        }
    }

    /// Treat an additional API error code as retryable.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.codes.insert(code.into());
        self
    }

    /// Treat several API error codes as retryable.
    #[must_use]
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Treat a code and all of its dotted sub-codes as retryable.
    ///
    /// `ResourceUnavailable` as a family matches `ResourceUnavailable` and
    /// `ResourceUnavailable.InstanceLocked`, but not `ResourceUnavailableX`.
    #[must_use]
    pub fn with_code_family(mut self, family: impl Into<String>) -> Self {
        self.code_families.push(family.into());
        self
    }

    /// Treat not-found errors as read-after-write lag and retry them.
    #[must_use]
    pub fn retry_not_found(mut self, retry: bool) -> Self {
        self.retry_not_found = retry;
        self
    }

    /// Whether not-found errors are retried.
    #[must_use]
    pub fn retries_not_found(&self) -> bool {
        self.retry_not_found
    }

    /// Whether an API error code is declared retryable.
    #[must_use]
    pub fn is_retryable_code(&self, code: &str) -> bool {
        if self.codes.contains(code) {
            return true;
        }
        self.code_families.iter().any(|family| {
            code == family
                || (code.len() > family.len()
                    && code.starts_with(family.as_str())
                    && code.as_bytes()[family.len()] == b'.')
        })
    }
}

/// Classify an optional error.
///
/// `None` is [`Outcome::Success`]. Transport errors are always retryable; API
/// errors are retryable when their code is hinted; not-found errors are
/// retryable only when hinted; everything else is fatal.
pub fn classify<E>(err: Option<&E>, hints: &RetryHints) -> Outcome
where
    E: ClassifyError + std::fmt::Display + ?Sized,
{
    let Some(err) = err else {
        return Outcome::Success;
    };

    match err.error_kind() {
        ErrorKind::Transport => Outcome::Retryable(format!("transport: {err}")),
        ErrorKind::Api { code } if hints.is_retryable_code(code) => {
            Outcome::Retryable(format!("retryable code {code}: {err}"))
        }
        ErrorKind::NotFound if hints.retry_not_found => {
            Outcome::Retryable(format!("not yet visible: {err}"))
        }
        _ => Outcome::Fatal(err.to_string()),
    }
}

/// Classify a call result.
pub fn classify_result<T, E>(result: &Result<T, E>, hints: &RetryHints) -> Outcome
where
    E: ClassifyError + std::fmt::Display,
{
    classify(result.as_ref().err(), hints)
}
