// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-identity exclusive leases for mutating operations.
//!
//! Some control plane APIs reject or corrupt concurrent mutations of one
//! resource (load balancer listeners, address bindings). A [`LeaseRegistry`]
//! hands out at most one [`ResourceLease`] per identity at a time, and the
//! orchestrator refuses to mutate a resource without the matching lease.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::identity::ResourceId;

/// Hands out exclusive leases keyed by resource identity.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LeaseRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop entries nobody holds or waits on.
        locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for and take the lease for `id`.
    pub async fn acquire(&self, id: &ResourceId) -> ResourceLease {
        let slot = self.slot(id.as_str()).await;
        let guard = slot.lock_owned().await;
        debug!(resource = %id, "lease acquired");
        ResourceLease {
            key: id.clone(),
            _guard: guard,
        }
    }

    /// Take the lease for `id` if nobody holds it.
    pub async fn try_acquire(&self, id: &ResourceId) -> Option<ResourceLease> {
        let slot = self.slot(id.as_str()).await;
        let guard = slot.try_lock_owned().ok()?;
        Some(ResourceLease {
            key: id.clone(),
            _guard: guard,
        })
    }

    /// Number of identities with a live lease or waiter.
    pub async fn len(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }

    /// Whether no lease is live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Exclusive right to mutate one resource. Released on drop.
#[derive(Debug)]
pub struct ResourceLease {
    key: ResourceId,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceLease {
    /// Identity this lease covers.
    pub fn key(&self) -> &ResourceId {
        &self.key
    }

    /// Whether this lease covers `id`.
    pub fn covers(&self, id: &ResourceId) -> bool {
        &self.key == id
    }
}
