// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the reconciliation core.
//!
//! Timeouts and intervals are plain values. They are read from a YAML file or
//! string, never from environment variables, and converted into the
//! [`RetryPolicy`](crate::runtime::RetryPolicy) and
//! [`Poller`](crate::runtime::Poller) values the orchestrator uses.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::config::ReconcileConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcileConfig::from_yaml("write_timeout_secs: 900\npoll_interval_ms: 5000")?;
//! assert_eq!(config.write_policy().deadline.as_secs(), 900);
//! # Ok(())
//! # }
//! ```

mod settings;

pub use settings::{BackoffConfig, ReconcileConfig};
