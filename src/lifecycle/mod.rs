// SPDX-License-Identifier: MIT OR Apache-2.0

//! Create, read, update and delete of one remote resource.
//!
//! The [`Orchestrator`] drives a resource through its lifecycle on top of a
//! [`RemoteClient`]. Each step is built from the convergence primitives in
//! [`runtime`](crate::runtime):
//!
//! - **create**: submit (retried), track the task if asynchronous, wait for a
//!   ready status, return the identity.
//! - **read**: one retried query; not found is `Ok(None)`.
//! - **update**: attribute groups in order, each either one modify action or a
//!   set delta, each confirmed ready before the next.
//! - **delete**: isolate, wait isolated, destroy, wait gone. Resources without
//!   soft delete skip the first two steps.
//!
//! Mutating calls on an existing resource take a [`ResourceLease`] from a
//! [`LeaseRegistry`].

mod client;
mod lease;
mod state;

pub use client::{Action, AttributeChange, PlanChanges, RemoteClient};
pub use lease::{LeaseRegistry, ResourceLease};
pub use state::{PhaseTracker, ResourceState};

use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, Result};
use crate::identity::{ResourceId, TaskHandle};
use crate::reconcile::{ApplyOrder, SetReconciler};
use crate::runtime::{
    ClassifyError, ErrorKind, Observation, Poller, RetryPolicy, StatusClass, StatusSet,
    Submission, TaskTracker,
};

/// Status partitions for one resource type.
#[derive(Debug, Clone)]
pub struct LifecycleProfile {
    ready: StatusSet,
    isolated: Option<StatusSet>,
    destroyed: StatusSet,
}

impl LifecycleProfile {
    /// Profile without a soft-delete stage.
    ///
    /// `destroyed` lists the statuses seen while the resource is going away;
    /// not found always counts as destroyed.
    pub fn new(ready: StatusSet, destroyed: StatusSet) -> Self {
        Self {
            ready,
            isolated: None,
            destroyed: destroyed.when_absent(StatusClass::Success),
        }
    }

    /// Add a soft-delete stage. Not found while isolating means the resource
    /// is already gone.
    #[must_use]
    pub fn with_isolation(mut self, isolated: StatusSet) -> Self {
        self.isolated = Some(isolated.when_absent(StatusClass::Success));
        self
    }

    /// Ready partition.
    pub fn ready(&self) -> &StatusSet {
        &self.ready
    }

    /// Whether deletion starts with isolation.
    pub fn has_isolation(&self) -> bool {
        self.isolated.is_some()
    }
}

/// What delete does after isolation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Destroy the resource permanently.
    #[default]
    Destroy,
    /// Stop once isolated, e.g. for prepaid resources that are released by
    /// the billing system.
    RetainIsolated,
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// State the resource was left in: gone, or isolated when retained.
    pub state: ResourceState,
    /// Dependent children the remote side is still releasing.
    pub draining_dependents: Vec<String>,
}

/// Drives one resource type through its lifecycle.
#[derive(Debug, Clone)]
pub struct Orchestrator<C> {
    client: C,
    profile: LifecycleProfile,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
    poller: Poller,
    delete_policy: DeletePolicy,
    apply_order: ApplyOrder,
}

impl<C: RemoteClient> Orchestrator<C> {
    /// Orchestrator with default deadlines and polling.
    pub fn new(client: C, profile: LifecycleProfile) -> Self {
        Self {
            client,
            profile,
            read_policy: RetryPolicy::read(),
            write_policy: RetryPolicy::write(),
            poller: Poller::new(RetryPolicy::write().deadline),
            delete_policy: DeletePolicy::default(),
            apply_order: ApplyOrder::default(),
        }
    }

    /// Take deadlines, backoff, hints and polling from `config`.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Config`] if the configuration is invalid.
    pub fn with_config(mut self, config: &ReconcileConfig) -> Result<Self> {
        config.validate()?;
        self.read_policy = config.read_policy();
        self.write_policy = config.write_policy();
        self.poller = config.poller();
        Ok(self)
    }

    /// Policy for idempotent reads.
    #[must_use]
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Policy for submissions and element changes.
    #[must_use]
    pub fn with_write_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Poller for status and task waits.
    #[must_use]
    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// What delete does after isolation.
    #[must_use]
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Order for set-valued attribute deltas.
    #[must_use]
    pub fn with_apply_order(mut self, order: ApplyOrder) -> Self {
        self.apply_order = order;
        self
    }

    /// The wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn tasks(&self) -> TaskTracker {
        TaskTracker::new(self.write_policy.clone(), self.poller.clone())
    }

    /// Submit `action` and track it when the remote side answers with a task.
    /// A not-found answer counts as done for deletions.
    async fn run_action(
        &self,
        operation: &str,
        action: Action<'_, C::Payload>,
    ) -> Result<Option<ResourceId>> {
        let client = &self.client;
        let tolerate_not_found = matches!(action, Action::Isolate(_) | Action::Destroy(_));

        let outcome = self
            .tasks()
            .run(
                operation,
                || async move {
                    match client.submit(action).await {
                        Err(err)
                            if tolerate_not_found && err.error_kind() == ErrorKind::NotFound =>
                        {
                            Ok(Submission::Completed { resource_id: None })
                        }
                        other => other,
                    }
                },
                |handle: TaskHandle| async move { client.query_task(&handle).await },
            )
            .await?;

        Ok(outcome.resource_id)
    }

    async fn wait_status(
        &self,
        operation: &str,
        id: &ResourceId,
        partition: &StatusSet,
    ) -> Result<Observation<String>> {
        let client = &self.client;
        self.poller
            .wait_for(operation, partition, || async move {
                client.query_status(id).await.map(Observation::from)
            })
            .await
    }

    /// Create a resource and wait until it is ready.
    ///
    /// A resource that never becomes ready is left in place; nothing is
    /// rolled back.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::MissingIdentity`] if neither the submission nor the
    ///   task reported an identity.
    /// - Retry, task and poll errors from each step.
    pub async fn create(&self, desired: &C::Payload) -> Result<ResourceId> {
        let mut phase = PhaseTracker::new("new resource", ResourceState::Creating);

        let created = self.run_action("create", Action::Create(desired)).await;
        let id = phase
            .settle(created)?
            .ok_or_else(|| ReconcileError::MissingIdentity {
                operation: "create".to_string(),
            })?;
        phase.identify(id.as_str());
        info!(resource = %id, "resource created, waiting until ready");

        let ready = self
            .wait_status(&format!("wait {id} ready"), &id, &self.profile.ready)
            .await;
        phase.settle(ready)?;
        phase.advance(ResourceState::Ready)?;
        Ok(id)
    }

    /// Describe a resource.
    ///
    /// # Errors
    ///
    /// Fatal and deadline errors from the retried query. Not found is
    /// `Ok(None)`, not an error.
    pub async fn read(&self, id: &ResourceId) -> Result<Option<C::Observed>> {
        let client = &self.client;
        self.read_policy
            .execute(&format!("describe {id}"), || async move {
                match client.describe(id).await {
                    Err(err) if err.error_kind() == ErrorKind::NotFound => Ok(None),
                    other => other,
                }
            })
            .await
    }

    /// Move the resource from `observed` to `desired`, one attribute group at
    /// a time. Returns the names of the groups that changed.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::LeaseMismatch`] if `lease` does not cover `id`.
    /// - The first failing group's error; later groups are not attempted.
    pub async fn update<D>(
        &self,
        lease: &ResourceLease,
        id: &ResourceId,
        desired: &D,
        observed: &D,
    ) -> Result<Vec<String>>
    where
        D: PlanChanges<Payload = C::Payload, Element = C::Element>,
    {
        check_lease(lease, id)?;
        let changes = desired.plan_changes(observed);
        let mut applied = Vec::with_capacity(changes.len());
        if changes.is_empty() {
            return Ok(applied);
        }

        let mut phase = PhaseTracker::new(id.as_str(), ResourceState::Ready);
        phase.advance(ResourceState::Updating)?;
        let client = &self.client;
        let sets = SetReconciler::new(self.write_policy.clone()).with_order(self.apply_order);

        for change in changes {
            let group = change.group().to_string();
            let changed = match change {
                AttributeChange::Modify { payload, .. } => {
                    let action = Action::Modify {
                        id,
                        group: &group,
                        payload: &payload,
                    };
                    let result = self.run_action(&format!("modify {group} of {id}"), action).await;
                    phase.settle(result)?;
                    true
                }
                AttributeChange::Collection {
                    desired, observed, ..
                } => {
                    let group_name = group.as_str();
                    let result = sets
                        .reconcile(
                            &format!("{group} of {id}"),
                            desired,
                            observed,
                            |element, op| async move {
                                client.apply_element(id, group_name, &element, op).await
                            },
                        )
                        .await;
                    !phase.settle(result)?.is_empty()
                }
            };

            if changed {
                let ready = self
                    .wait_status(&format!("wait {id} ready after {group}"), id, &self.profile.ready)
                    .await;
                phase.settle(ready)?;
                applied.push(group);
            }
        }

        phase.advance(ResourceState::Ready)?;
        Ok(applied)
    }

    /// Delete the resource: isolate first if the profile has a soft-delete
    /// stage, then destroy unless the delete policy retains isolated
    /// resources.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::LeaseMismatch`] if `lease` does not cover `id`.
    /// - Task, poll and retry errors from each stage.
    pub async fn delete(&self, lease: &ResourceLease, id: &ResourceId) -> Result<DeleteReport> {
        check_lease(lease, id)?;
        let mut phase = PhaseTracker::new(id.as_str(), ResourceState::Ready);

        if let Some(isolated) = &self.profile.isolated {
            phase.advance(ResourceState::Isolating)?;
            let submitted = self.run_action(&format!("isolate {id}"), Action::Isolate(id)).await;
            phase.settle(submitted)?;

            let observed = self
                .wait_status(&format!("wait {id} isolated"), id, isolated)
                .await;
            if phase.settle(observed)?.is_absent() {
                info!(resource = %id, "resource already gone while isolating");
                phase.advance(ResourceState::Gone)?;
                return Ok(DeleteReport {
                    state: phase.state(),
                    draining_dependents: Vec::new(),
                });
            }
            phase.advance(ResourceState::Isolated)?;

            if self.delete_policy == DeletePolicy::RetainIsolated {
                info!(resource = %id, "retaining isolated resource");
                return Ok(DeleteReport {
                    state: phase.state(),
                    draining_dependents: Vec::new(),
                });
            }
        }

        phase.advance(ResourceState::Deleting)?;
        let submitted = self.run_action(&format!("destroy {id}"), Action::Destroy(id)).await;
        phase.settle(submitted)?;
        let gone = self
            .wait_status(&format!("wait {id} destroyed"), id, &self.profile.destroyed)
            .await;
        phase.settle(gone)?;

        let draining = self.draining_dependents(id).await?;
        if !draining.is_empty() {
            warn!(
                resource = %id,
                dependents = ?draining,
                "resource destroyed, dependents still being released"
            );
        }

        phase.advance(ResourceState::Gone)?;
        Ok(DeleteReport {
            state: phase.state(),
            draining_dependents: draining,
        })
    }

    async fn draining_dependents(&self, id: &ResourceId) -> Result<Vec<String>> {
        let client = &self.client;
        self.read_policy
            .execute(&format!("list dependents of {id}"), || async move {
                match client.dependents(id).await {
                    Err(err) if err.error_kind() == ErrorKind::NotFound => Ok(Vec::new()),
                    other => other,
                }
            })
            .await
    }
}

fn check_lease(lease: &ResourceLease, id: &ResourceId) -> Result<()> {
    if lease.covers(id) {
        Ok(())
    } else {
        Err(ReconcileError::LeaseMismatch {
            held: lease.key().to_string(),
            requested: id.to_string(),
        })
    }
}
