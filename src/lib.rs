// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciliation core for declarative cloud resource providers.
//!
//! Maps a desired configuration onto a rate-limited, eventually consistent
//! control plane through a small set of primitives:
//!
//! - [`runtime`]: outcome classification, deadline-bounded retry, status
//!   polling and asynchronous task tracking.
//! - [`reconcile`]: minimal add/remove deltas for set- and map-valued
//!   attributes.
//! - [`lifecycle`]: create, read, update and delete of one resource on top of
//!   an abstract [`RemoteClient`].

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod reconcile;
pub mod runtime;
pub mod testkit;

pub use config::ReconcileConfig;
pub use error::{ReconcileError, RemoteError, Result};
pub use identity::{CompositeId, ResourceId, TaskHandle};
pub use lifecycle::{
    DeletePolicy, DeleteReport, LeaseRegistry, LifecycleProfile, Orchestrator, RemoteClient,
    ResourceLease, ResourceState,
};
pub use reconcile::{ApplyOrder, Delta, ElementOp, SetReconciler};
pub use runtime::{Poller, RetryHints, RetryPolicy, StatusSet};
