// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciliation of set-valued and map-valued attributes.
//!
//! Attributes such as bound security groups, secondary IPs or backend
//! attachments are applied as minimal deltas: elements only in the desired set
//! are added, elements only in the observed set are removed, and the
//! intersection is left alone. Every element is its own remote call wrapped in
//! the retry executor.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::reconcile::Delta;
//!
//! let delta = Delta::compute(["sg-1", "sg-2"], ["sg-2", "sg-3"]);
//! assert_eq!(delta.to_add, vec!["sg-1"]);
//! assert_eq!(delta.to_remove, vec!["sg-3"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;

use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::runtime::{BackoffStrategy, ClassifyError, ExponentialBackoff, RetryPolicy};

/// Direction of a single element change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementOp {
    /// Attach or bind the element.
    Add,
    /// Detach or unbind the element.
    Remove,
}

impl fmt::Display for ElementOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementOp::Add => write!(f, "add"),
            ElementOp::Remove => write!(f, "remove"),
        }
    }
}

/// Elements to add and remove to turn an observed set into a desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<T> {
    /// Desired elements missing from the observed set.
    pub to_add: Vec<T>,
    /// Observed elements missing from the desired set.
    pub to_remove: Vec<T>,
}

impl<T: Clone + Eq + Hash> Delta<T> {
    /// Compute the delta, keeping input order and dropping duplicates.
    pub fn compute<D, O>(desired: D, observed: O) -> Self
    where
        D: IntoIterator<Item = T>,
        O: IntoIterator<Item = T>,
    {
        let desired = unique(desired);
        let observed = unique(observed);

        let desired_set: HashSet<&T> = desired.iter().collect();
        let observed_set: HashSet<&T> = observed.iter().collect();

        let to_add = desired
            .iter()
            .filter(|e| !observed_set.contains(e))
            .cloned()
            .collect();
        let to_remove = observed
            .iter()
            .filter(|e| !desired_set.contains(e))
            .cloned()
            .collect();

        Self { to_add, to_remove }
    }
}

impl<T> Delta<T> {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

fn unique<T: Clone + Eq + Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Which half of a delta is applied first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyOrder {
    /// Removals before additions. Frees quota and avoids conflicts with
    /// elements being replaced.
    #[default]
    RemoveFirst,
    /// Additions before removals, for attributes that must never be empty.
    AddFirst,
}

impl ApplyOrder {
    fn ops(self) -> [ElementOp; 2] {
        match self {
            ApplyOrder::RemoveFirst => [ElementOp::Remove, ElementOp::Add],
            ApplyOrder::AddFirst => [ElementOp::Add, ElementOp::Remove],
        }
    }
}

/// Desired changes for a key/value attribute such as tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDelta<K, V> {
    /// Keys that are new or whose value changed.
    pub upsert: Vec<(K, V)>,
    /// Keys present remotely but no longer desired.
    pub remove: Vec<K>,
}

impl<K: Clone + Eq + Hash, V: Clone + PartialEq> MapDelta<K, V> {
    /// Compute the map delta, keeping the input order of each side.
    pub fn compute<D, O>(desired: D, observed: O) -> Self
    where
        D: IntoIterator<Item = (K, V)>,
        O: IntoIterator<Item = (K, V)>,
    {
        let observed: Vec<(K, V)> = observed.into_iter().collect();
        let observed_map: HashMap<&K, &V> = observed.iter().map(|(k, v)| (k, v)).collect();

        let mut desired_keys = HashSet::new();
        let mut upsert = Vec::new();
        for (key, value) in desired {
            if !desired_keys.insert(key.clone()) {
                continue;
            }
            if observed_map.get(&key) != Some(&&value) {
                upsert.push((key, value));
            }
        }

        let mut removed = HashSet::new();
        let remove = observed
            .iter()
            .filter(|(key, _)| !desired_keys.contains(key) && removed.insert(key.clone()))
            .map(|(key, _)| key.clone())
            .collect();

        Self { upsert, remove }
    }
}

impl<K, V> MapDelta<K, V> {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// One change from a [`MapDelta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapChange<K, V> {
    /// Set `key` to `value`.
    Upsert(K, V),
    /// Delete `key`.
    Remove(K),
}

/// Applies deltas through the retry executor.
#[derive(Debug, Clone)]
pub struct SetReconciler<B: BackoffStrategy = ExponentialBackoff> {
    policy: RetryPolicy<B>,
    order: ApplyOrder,
}

impl Default for SetReconciler {
    fn default() -> Self {
        Self::new(RetryPolicy::write())
    }
}

impl<B: BackoffStrategy> SetReconciler<B> {
    /// Reconciler applying removals first under `policy`.
    pub fn new(policy: RetryPolicy<B>) -> Self {
        Self {
            policy,
            order: ApplyOrder::default(),
        }
    }

    /// Set the apply order.
    #[must_use]
    pub fn with_order(mut self, order: ApplyOrder) -> Self {
        self.order = order;
        self
    }

    /// Configured apply order.
    pub fn order(&self) -> ApplyOrder {
        self.order
    }

    /// Compute the delta between `desired` and `observed` and apply it one
    /// element at a time.
    ///
    /// Returns the applied delta. An empty half makes no call.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::ElementFailed`] for the first element that fails
    /// permanently or runs out of time. Elements applied before it stay applied.
    pub async fn reconcile<T, D, O, E, F, Fut>(
        &self,
        name: &str,
        desired: D,
        observed: O,
        mut apply: F,
    ) -> Result<Delta<T>>
    where
        T: Clone + Eq + Hash + fmt::Debug,
        D: IntoIterator<Item = T>,
        O: IntoIterator<Item = T>,
        F: FnMut(T, ElementOp) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        let delta = Delta::compute(desired, observed);
        if delta.is_empty() {
            debug!(name, "attribute already converged");
            return Ok(delta);
        }
        debug!(
            name,
            add = delta.to_add.len(),
            remove = delta.to_remove.len(),
            "applying set delta"
        );

        for op in self.order.ops() {
            let half = match op {
                ElementOp::Add => &delta.to_add,
                ElementOp::Remove => &delta.to_remove,
            };
            for element in half {
                let operation = format!("{name}: {op} {element:?}");
                self.policy
                    .execute(&operation, || apply(element.clone(), op))
                    .await
                    .map_err(|source| ReconcileError::ElementFailed {
                        element: format!("{element:?}"),
                        op,
                        source: Box::new(source),
                    })?;
            }
        }

        Ok(delta)
    }

    /// Like [`reconcile`](Self::reconcile), but passes up to `chunk_size`
    /// elements per call for APIs that take element lists.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Config`] when `chunk_size` is zero, otherwise
    /// [`ReconcileError::ElementFailed`] naming the failed chunk.
    pub async fn reconcile_chunked<T, D, O, E, F, Fut>(
        &self,
        name: &str,
        desired: D,
        observed: O,
        chunk_size: usize,
        mut apply: F,
    ) -> Result<Delta<T>>
    where
        T: Clone + Eq + Hash + fmt::Debug,
        D: IntoIterator<Item = T>,
        O: IntoIterator<Item = T>,
        F: FnMut(Vec<T>, ElementOp) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        if chunk_size == 0 {
            return Err(ReconcileError::Config(format!(
                "{name}: chunk size must be positive"
            )));
        }

        let delta = Delta::compute(desired, observed);
        for op in self.order.ops() {
            let half = match op {
                ElementOp::Add => &delta.to_add,
                ElementOp::Remove => &delta.to_remove,
            };
            for chunk in half.chunks(chunk_size) {
                let operation = format!("{name}: {op} {} element(s)", chunk.len());
                self.policy
                    .execute(&operation, || apply(chunk.to_vec(), op))
                    .await
                    .map_err(|source| ReconcileError::ElementFailed {
                        element: format!("{chunk:?}"),
                        op,
                        source: Box::new(source),
                    })?;
            }
        }

        Ok(delta)
    }

    /// Apply a [`MapDelta`] one key at a time, removals ordered like sets.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::ElementFailed`] for the first failing key; upserts are
    /// reported as [`ElementOp::Add`].
    pub async fn reconcile_map<K, V, D, O, E, F, Fut>(
        &self,
        name: &str,
        desired: D,
        observed: O,
        mut apply: F,
    ) -> Result<MapDelta<K, V>>
    where
        K: Clone + Eq + Hash + fmt::Debug,
        V: Clone + PartialEq,
        D: IntoIterator<Item = (K, V)>,
        O: IntoIterator<Item = (K, V)>,
        F: FnMut(MapChange<K, V>) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        let delta = MapDelta::compute(desired, observed);
        if delta.is_empty() {
            debug!(name, "map attribute already converged");
            return Ok(delta);
        }

        for op in self.order.ops() {
            let changes: Vec<(K, MapChange<K, V>)> = match op {
                ElementOp::Add => delta
                    .upsert
                    .iter()
                    .map(|(k, v)| (k.clone(), MapChange::Upsert(k.clone(), v.clone())))
                    .collect(),
                ElementOp::Remove => delta
                    .remove
                    .iter()
                    .map(|k| (k.clone(), MapChange::Remove(k.clone())))
                    .collect(),
            };
            for (key, change) in changes {
                let operation = format!("{name}: {op} {key:?}");
                self.policy
                    .execute(&operation, || apply(change.clone()))
                    .await
                    .map_err(|source| ReconcileError::ElementFailed {
                        element: format!("{key:?}"),
                        op,
                        source: Box::new(source),
                    })?;
            }
        }

        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::runtime::NoBackoff;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    type Journal = Arc<Mutex<Vec<(String, ElementOp)>>>;

    fn reconciler() -> SetReconciler<NoBackoff> {
        SetReconciler::new(
            RetryPolicy::builder()
                .deadline(Duration::from_secs(5))
                .backoff(NoBackoff::new())
                .build(),
        )
    }

    #[test]
    fn test_delta_example() {
        let delta = Delta::compute(
            ["sg-1".to_string(), "sg-2".to_string()],
            ["sg-2".to_string(), "sg-3".to_string()],
        );
        assert_eq!(delta.to_add, vec!["sg-1".to_string()]);
        assert_eq!(delta.to_remove, vec!["sg-3".to_string()]);
    }

    #[test]
    fn test_delta_dedups_and_keeps_order() {
        let delta = Delta::compute([3, 1, 3, 2], [2, 9, 9]);
        assert_eq!(delta.to_add, vec![3, 1]);
        assert_eq!(delta.to_remove, vec![9]);
        assert!(Delta::compute([1, 2], [2, 1]).is_empty());
    }

    #[test]
    fn test_map_delta() {
        let delta = MapDelta::compute(
            [("env", "prod"), ("team", "core"), ("tier", "web")],
            [("env", "dev"), ("team", "core"), ("owner", "ops")],
        );
        assert_eq!(delta.upsert, vec![("env", "prod"), ("tier", "web")]);
        assert_eq!(delta.remove, vec!["owner"]);
    }

    proptest! {
        #[test]
        fn delta_is_idempotent(
            desired in proptest::collection::vec(0u8..32, 0..24),
            observed in proptest::collection::vec(0u8..32, 0..24),
        ) {
            let delta = Delta::compute(desired.clone(), observed.clone());

            let mut applied: HashSet<u8> = observed.iter().copied().collect();
            for e in &delta.to_remove {
                applied.remove(e);
            }
            applied.extend(delta.to_add.iter().copied());

            let wanted: HashSet<u8> = desired.iter().copied().collect();
            prop_assert_eq!(&applied, &wanted);
            prop_assert!(Delta::compute(desired.clone(), applied).is_empty());
        }

        #[test]
        fn delta_halves_are_disjoint_subsets(
            desired in proptest::collection::vec(0u8..16, 0..16),
            observed in proptest::collection::vec(0u8..16, 0..16),
        ) {
            let delta = Delta::compute(desired.clone(), observed.clone());
            for e in &delta.to_add {
                prop_assert!(desired.contains(e));
                prop_assert!(!observed.contains(e));
            }
            for e in &delta.to_remove {
                prop_assert!(observed.contains(e));
                prop_assert!(!desired.contains(e));
            }
        }
    }

    #[tokio::test]
    async fn test_remove_runs_before_add() {
        let journal: Journal = Arc::default();

        let delta = reconciler()
            .reconcile("security groups", ["sg-1", "sg-2"], ["sg-2", "sg-3"], |sg, op| {
                let journal = journal.clone();
                async move {
                    journal.lock().await.push((sg.to_string(), op));
                    Ok::<_, RemoteError>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(delta.to_add, vec!["sg-1"]);
        assert_eq!(
            *journal.lock().await,
            vec![
                ("sg-3".to_string(), ElementOp::Remove),
                ("sg-1".to_string(), ElementOp::Add)
            ]
        );
    }

    #[tokio::test]
    async fn test_add_first_order() {
        let journal: Journal = Arc::default();

        reconciler()
            .with_order(ApplyOrder::AddFirst)
            .reconcile("backends", ["b"], ["a"], |e, op| {
                let journal = journal.clone();
                async move {
                    journal.lock().await.push((e.to_string(), op));
                    Ok::<_, RemoteError>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(journal.lock().await[0], ("b".to_string(), ElementOp::Add));
    }

    #[tokio::test]
    async fn test_converged_set_makes_no_calls() {
        let journal: Journal = Arc::default();

        let delta = reconciler()
            .reconcile("ips", ["10.0.0.4"], ["10.0.0.4"], |e, op| {
                let journal = journal.clone();
                async move {
                    journal.lock().await.push((e.to_string(), op));
                    Ok::<_, RemoteError>(())
                }
            })
            .await
            .unwrap();

        assert!(delta.is_empty());
        assert!(journal.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_aborts_without_rollback() {
        let journal: Journal = Arc::default();

        let err = reconciler()
            .reconcile("security groups", ["sg-1", "sg-2"], ["sg-9"], |sg, op| {
                let journal = journal.clone();
                async move {
                    if sg == "sg-2" {
                        return Err(RemoteError::api("InvalidSecurityGroupID.NotFound", sg));
                    }
                    journal.lock().await.push((sg.to_string(), op));
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        match err {
            ReconcileError::ElementFailed { element, op, .. } => {
                assert_eq!(element, "\"sg-2\"");
                assert_eq!(op, ElementOp::Add);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            *journal.lock().await,
            vec![
                ("sg-9".to_string(), ElementOp::Remove),
                ("sg-1".to_string(), ElementOp::Add)
            ]
        );
    }

    #[tokio::test]
    async fn test_retryable_element_is_retried() {
        let attempts = Arc::new(Mutex::new(0u32));

        reconciler()
            .reconcile("ips", ["10.0.0.5"], Vec::<&str>::new(), |_, _| {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock().await;
                    *n += 1;
                    if *n < 3 {
                        Err(RemoteError::api("ResourceInUse", "eni locked"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(*attempts.lock().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_deadline_is_reported_as_deadline() {
        let reconciler = SetReconciler::new(
            RetryPolicy::builder()
                .deadline(Duration::from_secs(3))
                .backoff(crate::runtime::FixedBackoff::from_secs(1))
                .build(),
        );

        let err = reconciler
            .reconcile("security groups", ["sg-1"], Vec::<&str>::new(), |_, _| async {
                Err::<(), _>(RemoteError::api("ResourceBusy", "instance locked"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::ElementFailed { .. }));
        assert!(err.is_deadline_exceeded());
        assert!(!err.is_remote_failure());
    }

    #[tokio::test]
    async fn test_chunked_batches() {
        let batches: Arc<Mutex<Vec<(Vec<u32>, ElementOp)>>> = Arc::default();
        let desired: Vec<u32> = (0..25).collect();

        reconciler()
            .reconcile_chunked("private ips", desired, [100, 101], 10, |chunk, op| {
                let batches = batches.clone();
                async move {
                    batches.lock().await.push((chunk, op));
                    Ok::<_, RemoteError>(())
                }
            })
            .await
            .unwrap();

        let batches = batches.lock().await;
        let sizes: Vec<(usize, ElementOp)> = batches.iter().map(|(c, op)| (c.len(), *op)).collect();
        assert_eq!(
            sizes,
            vec![
                (2, ElementOp::Remove),
                (10, ElementOp::Add),
                (10, ElementOp::Add),
                (5, ElementOp::Add)
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_size_zero_rejected() {
        let err = reconciler()
            .reconcile_chunked("ips", [1], [2], 0, |_, _| async { Ok::<_, RemoteError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }

    #[tokio::test]
    async fn test_map_reconcile() {
        let changes: Arc<Mutex<Vec<MapChange<&str, &str>>>> = Arc::default();

        reconciler()
            .reconcile_map(
                "tags",
                [("env", "prod"), ("team", "core")],
                [("env", "dev"), ("team", "core"), ("owner", "ops")],
                |change| {
                    let changes = changes.clone();
                    async move {
                        changes.lock().await.push(change);
                        Ok::<_, RemoteError>(())
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(
            *changes.lock().await,
            vec![MapChange::Remove("owner"), MapChange::Upsert("env", "prod")]
        );
    }
}
