// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delays between attempts, shared by the retry executor and the poller.
//!
//! Polling uses a [`FixedBackoff`] interval; retried calls default to an
//! [`ExponentialBackoff`] so that throttled requests back off quickly.

use std::time::Duration;

/// Computes the pause after a failed attempt.
pub trait BackoffStrategy: Clone + Send + Sync + 'static {
    /// Pause after attempt number `attempt`, counting from zero.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl NoBackoff {
    /// Create a zero-delay strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BackoffStrategy for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Constant pause; the usual status polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    /// Pause `interval` after every attempt.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Interval in milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Interval in seconds.
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// The configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::from_secs(1)
    }
}

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// `start + step * attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    start: Duration,
    step: Duration,
    cap: Duration,
}

impl LinearBackoff {
    /// Grow from `start` by `step` per attempt, capped at 30 seconds.
    #[must_use]
    pub fn new(start: Duration, step: Duration) -> Self {
        Self {
            start,
            step,
            cap: Duration::from_secs(30),
        }
    }

    /// Set the cap.
    #[must_use]
    pub fn capped_at(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.start
            .saturating_add(self.step.saturating_mul(attempt))
            .min(self.cap)
    }
}

/// `initial * factor^attempt`, capped, plus up to 25% random jitter so that
/// many resources throttled by the same rate limit do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    cap: Duration,
    factor: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Start at `initial`, doubling up to 10 seconds, with jitter.
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self {
            initial,
            cap: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Set the cap.
    #[must_use]
    pub fn capped_at(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Turn jitter on or off.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.initial.as_secs_f64() * self.factor.powi(exponent);
        // f64::min discards NaN, and an infinite product collapses to the cap.
        let capped = saturating_secs(grown.min(self.cap.as_secs_f64()).max(0.0));

        if self.jitter {
            saturating_secs(capped.as_secs_f64() * (1.0 + 0.25 * rand::random::<f64>()))
        } else {
            capped
        }
    }
}

/// Float seconds to a duration, saturating at [`Duration::MAX`].
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backoff() {
        assert_eq!(NoBackoff::new().delay(0), Duration::ZERO);
        assert_eq!(NoBackoff::new().delay(50), Duration::ZERO);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = FixedBackoff::from_millis(250);
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(9), Duration::from_millis(250));
        assert_eq!(backoff.interval(), Duration::from_millis(250));
        assert_eq!(FixedBackoff::default().interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_linear_backoff_caps() {
        let backoff = LinearBackoff::new(Duration::from_millis(100), Duration::from_millis(50))
            .capped_at(Duration::from_millis(300));

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(20), Duration::from_millis(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100))
            .capped_at(Duration::from_secs(1))
            .jitter(false);

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_jitter_stays_within_quarter() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(400))
            .capped_at(Duration::from_secs(60));

        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_exponential_backoff_uncapped_saturates() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(500)).capped_at(Duration::MAX);

        assert_eq!(backoff.jitter(false).delay(u32::MAX), Duration::MAX);
        assert_eq!(backoff.jitter(false).delay(200), Duration::MAX);
        assert_eq!(backoff.delay(u32::MAX), Duration::MAX);
        assert_eq!(backoff.jitter(false).delay(1), Duration::from_secs(1));
    }
}
