// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deadlines, backoff and polling settings loaded from YAML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! read_timeout_secs: 180
//! write_timeout_secs: 300
//! poll_interval_ms: 1000
//! backoff:
//!   initial_ms: 500
//!   max_ms: 10000
//!   multiplier: 2.0
//!   jitter: true
//! retryable_codes:
//!   - FailedOperation.ResourceInOperating
//! not_found_checks: 10
//! retry_not_found: false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ReconcileError, Result};
use crate::runtime::{ExponentialBackoff, Poller, RetryHints, RetryPolicy};

/// Timing and classification settings for the reconciliation core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Deadline for idempotent reads, in seconds.
    pub read_timeout_secs: u64,

    /// Deadline for submissions and status waits, in seconds.
    pub write_timeout_secs: u64,

    /// Interval between status polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// Wait before the first status poll, in milliseconds.
    pub poll_delay_ms: u64,

    /// Backoff between retried calls.
    pub backoff: BackoffConfig,

    /// API error codes retried in addition to the default set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retryable_codes: Vec<String>,

    /// API error code prefixes retried with all their sub-codes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retryable_code_families: Vec<String>,

    /// Give up waiting for a resource to appear after this many consecutive
    /// not-found polls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_checks: Option<u32>,

    /// Retry calls that fail with not-found, for APIs whose reads lag behind
    /// their writes.
    pub retry_not_found: bool,
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay, in milliseconds.
    pub initial_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 180,
            write_timeout_secs: 300,
            poll_interval_ms: 1000,
            poll_delay_ms: 0,
            backoff: BackoffConfig::default(),
            retryable_codes: Vec::new(),
            retryable_code_families: Vec::new(),
            not_found_checks: None,
            retry_not_found: false,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconcileConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file is malformed YAML
    /// - A value is out of range
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ReconcileError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a value is out of range.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ReconcileError::Config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Config`] naming the first offending field.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(ReconcileError::Config(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ReconcileError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.backoff.multiplier >= 1.0 && self.backoff.multiplier.is_finite()) {
            return Err(ReconcileError::Config(format!(
                "backoff.multiplier must be a finite number >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.backoff.initial_ms > self.backoff.max_ms {
            return Err(ReconcileError::Config(format!(
                "backoff.initial_ms ({}) exceeds backoff.max_ms ({})",
                self.backoff.initial_ms, self.backoff.max_ms
            )));
        }
        if self.not_found_checks == Some(0) {
            return Err(ReconcileError::Config(
                "not_found_checks must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry hints: the default code set plus the configured codes.
    pub fn hints(&self) -> RetryHints {
        self.retryable_code_families.iter().fold(
            RetryHints::default()
                .with_codes(self.retryable_codes.iter().cloned())
                .retry_not_found(self.retry_not_found),
            |hints, family| hints.with_code_family(family.clone()),
        )
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(self.backoff.initial_ms))
            .capped_at(Duration::from_millis(self.backoff.max_ms))
            .factor(self.backoff.multiplier)
            .jitter(self.backoff.jitter)
    }

    /// Policy for idempotent reads.
    pub fn read_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .deadline(Duration::from_secs(self.read_timeout_secs))
            .backoff(self.backoff())
            .hints(self.hints())
            .build()
    }

    /// Policy for submissions and element changes.
    pub fn write_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .deadline(Duration::from_secs(self.write_timeout_secs))
            .backoff(self.backoff())
            .hints(self.hints())
            .build()
    }

    /// Poller for status and task waits, bounded by the write deadline.
    pub fn poller(&self) -> Poller {
        let poller = Poller::new(Duration::from_secs(self.write_timeout_secs))
            .with_interval(Duration::from_millis(self.poll_interval_ms))
            .with_delay(Duration::from_millis(self.poll_delay_ms))
            .with_hints(self.hints());
        match self.not_found_checks {
            Some(checks) => poller.with_not_found_checks(checks),
            None => poller,
        }
    }
}
