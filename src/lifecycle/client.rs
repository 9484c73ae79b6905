// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between the orchestrator and a concrete control plane API.

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;

use crate::identity::{ResourceId, TaskHandle};
use crate::reconcile::ElementOp;
use crate::runtime::{ClassifyError, Submission, TaskState};

/// A submit-type request the orchestrator sends to the control plane.
#[derive(Debug)]
pub enum Action<'a, P> {
    /// Create a resource from the desired configuration.
    Create(&'a P),
    /// Change one attribute group of an existing resource.
    Modify {
        /// Target resource.
        id: &'a ResourceId,
        /// Attribute group being changed.
        group: &'a str,
        /// Desired values for the group.
        payload: &'a P,
    },
    /// Soft delete (isolate, terminate to recycle bin).
    Isolate(&'a ResourceId),
    /// Permanently delete.
    Destroy(&'a ResourceId),
}

impl<P> Clone for Action<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Action<'_, P> {}

impl<P> Action<'_, P> {
    /// Short name used in operation labels.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create(_) => "create",
            Action::Modify { .. } => "modify",
            Action::Isolate(_) => "isolate",
            Action::Destroy(_) => "destroy",
        }
    }
}

/// Remote control plane capability consumed by the orchestrator.
///
/// Implementations translate each call into one API request and report
/// failures through an error type the classifier understands. They must not
/// retry or poll themselves.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Error returned by every call.
    type Error: ClassifyError + std::error::Error + Send + Sync + 'static;
    /// Desired configuration sent with create and modify actions.
    type Payload: Send + Sync;
    /// Element of a set-valued attribute.
    type Element: Clone + Eq + Hash + fmt::Debug + Send + Sync;
    /// Observed resource returned by [`describe`](Self::describe).
    type Observed: Send;

    /// Submit an action. May complete synchronously or return a task handle.
    async fn submit(&self, action: Action<'_, Self::Payload>) -> Result<Submission, Self::Error>;

    /// Current status of a resource, or `None` if it does not exist.
    async fn query_status(&self, id: &ResourceId) -> Result<Option<String>, Self::Error>;

    /// Current state of a task.
    async fn query_task(&self, handle: &TaskHandle) -> Result<TaskState, Self::Error>;

    /// Add or remove one element of a set-valued attribute group.
    async fn apply_element(
        &self,
        id: &ResourceId,
        group: &str,
        element: &Self::Element,
        op: ElementOp,
    ) -> Result<(), Self::Error>;

    /// Full observed state of a resource, or `None` if it does not exist.
    async fn describe(&self, id: &ResourceId) -> Result<Option<Self::Observed>, Self::Error>;

    /// Children of a resource that are still being released asynchronously.
    async fn dependents(&self, _id: &ResourceId) -> Result<Vec<String>, Self::Error> {
        Ok(Vec::new())
    }
}

/// One unit of an update, applied and confirmed before the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange<P, E> {
    /// A group changed through a single modify action.
    Modify {
        /// Attribute group name.
        group: String,
        /// Desired values for the group.
        payload: P,
    },
    /// A set-valued group changed element by element.
    Collection {
        /// Attribute group name.
        group: String,
        /// Desired elements.
        desired: Vec<E>,
        /// Observed elements.
        observed: Vec<E>,
    },
}

impl<P, E> AttributeChange<P, E> {
    /// Attribute group name.
    pub fn group(&self) -> &str {
        match self {
            AttributeChange::Modify { group, .. } | AttributeChange::Collection { group, .. } => {
                group
            }
        }
    }
}

/// Plans the ordered attribute changes between a desired and an observed
/// configuration of the same resource type.
pub trait PlanChanges {
    /// Payload of modify actions.
    type Payload;
    /// Element type of set-valued groups.
    type Element;

    /// Changes needed to move `observed` to `self`, in apply order.
    fn plan_changes(&self, observed: &Self) -> Vec<AttributeChange<Self::Payload, Self::Element>>;
}
