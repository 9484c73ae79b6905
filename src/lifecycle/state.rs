// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle states of a managed resource and the legal moves between them.

use std::fmt;

use tracing::{info, warn};

use crate::error::{ReconcileError, Result};

/// Where a resource is in its lifecycle, as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Creation submitted, not yet ready.
    Creating,
    /// Converged and usable.
    Ready,
    /// An attribute group is being changed.
    Updating,
    /// Soft delete submitted.
    Isolating,
    /// Soft deleted; can still be restored or destroyed.
    Isolated,
    /// Destroy submitted.
    Deleting,
    /// No longer exists remotely.
    Gone,
    /// The remote side reported a terminal failure. Never left automatically.
    Fatal,
}

impl ResourceState {
    /// Whether moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;

        matches!(
            (self, next),
            (Creating, Ready)
                | (Ready, Updating)
                | (Updating, Ready)
                | (Ready, Isolating)
                | (Ready, Deleting)
                | (Isolating, Isolated)
                | (Isolating, Gone)
                | (Isolated, Deleting)
                | (Deleting, Gone)
                | (Creating | Ready | Updating | Isolating | Isolated | Deleting, Fatal)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceState::Gone | ResourceState::Fatal)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceState::Creating => "creating",
            ResourceState::Ready => "ready",
            ResourceState::Updating => "updating",
            ResourceState::Isolating => "isolating",
            ResourceState::Isolated => "isolated",
            ResourceState::Deleting => "deleting",
            ResourceState::Gone => "gone",
            ResourceState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one resource through a single orchestrator call.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    resource: String,
    state: ResourceState,
}

impl PhaseTracker {
    /// Start tracking `resource` in `state`.
    pub fn new(resource: impl Into<String>, state: ResourceState) -> Self {
        Self {
            resource: resource.into(),
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Resource label used in logs and errors.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Attach the identity once the remote side has assigned one.
    pub fn identify(&mut self, resource: impl Into<String>) {
        self.resource = resource.into();
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::IllegalTransition`] if the move is not allowed.
    pub fn advance(&mut self, next: ResourceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ReconcileError::IllegalTransition {
                resource: self.resource.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        info!(resource = %self.resource, from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
        Ok(())
    }

    /// Pass `result` through, moving to [`ResourceState::Fatal`] when it
    /// carries a remote failure.
    pub fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_remote_failure() && !self.state.is_terminal() {
                warn!(resource = %self.resource, from = %self.state, error = %err, "resource failed remotely");
                self.state = ResourceState::Fatal;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut phase = PhaseTracker::new("cdb-1", ResourceState::Creating);
        for next in [
            ResourceState::Ready,
            ResourceState::Updating,
            ResourceState::Ready,
            ResourceState::Isolating,
            ResourceState::Isolated,
            ResourceState::Deleting,
            ResourceState::Gone,
        ] {
            phase.advance(next).unwrap();
        }
        assert!(phase.state().is_terminal());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut phase = PhaseTracker::new("cdb-1", ResourceState::Creating);
        let err = phase.advance(ResourceState::Isolated).unwrap_err();
        assert!(matches!(err, ReconcileError::IllegalTransition { .. }));
        assert_eq!(phase.state(), ResourceState::Creating);
    }

    #[test]
    fn test_fatal_is_sticky() {
        let mut phase = PhaseTracker::new("lb-1", ResourceState::Updating);
        let result: Result<()> = phase.settle(Err(ReconcileError::FailureStatus {
            operation: "wait ready".to_string(),
            status: "ERROR".to_string(),
        }));
        assert!(result.is_err());
        assert_eq!(phase.state(), ResourceState::Fatal);
        assert!(phase.advance(ResourceState::Ready).is_err());
    }

    #[test]
    fn test_deadline_does_not_mark_fatal() {
        let mut phase = PhaseTracker::new("lb-1", ResourceState::Creating);
        let _ = phase.settle::<()>(Err(ReconcileError::NeverAppeared {
            operation: "wait".to_string(),
            checks: 3,
        }));
        assert_eq!(phase.state(), ResourceState::Creating);
    }
}
