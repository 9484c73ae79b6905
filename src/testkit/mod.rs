// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory [`RemoteClient`] for tests.
//!
//! [`ScriptedClient`] replays scripted responses and records every call in a
//! journal, so tests can assert on ordering and call counts without a real
//! control plane. Status and task queues repeat their last entry once they
//! run dry, which makes deadline behavior easy to exercise.
//!
//! # Example
//!
//! ```
//! use cloud_reconcile::runtime::Submission;
//! use cloud_reconcile::testkit::{Script, ScriptedClient};
//!
//! let client = ScriptedClient::new(
//!     Script::new()
//!         .submission(Ok(Submission::Completed { resource_id: Some("ins-1".into()) }))
//!         .statuses(["PENDING", "RUNNING"]),
//! );
//! # let _ = client;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::RemoteError;
use crate::identity::{ResourceId, TaskHandle};
use crate::lifecycle::{Action, RemoteClient};
use crate::reconcile::ElementOp;
use crate::runtime::{Submission, TaskState};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `submit` with the action name and its target or group.
    Submit {
        action: &'static str,
        target: Option<String>,
    },
    /// `query_status` for a resource.
    QueryStatus(String),
    /// `query_task` for a handle.
    QueryTask(String),
    /// `apply_element`.
    ApplyElement {
        group: String,
        element: String,
        op: ElementOp,
    },
    /// `describe` for a resource.
    Describe(String),
    /// `dependents` for a resource.
    Dependents(String),
}

type Reply<T> = Result<T, RemoteError>;

/// Scripted responses for a [`ScriptedClient`].
#[derive(Debug, Default)]
pub struct Script {
    submissions: VecDeque<Reply<Submission>>,
    statuses: VecDeque<Reply<Option<String>>>,
    tasks: VecDeque<Reply<TaskState>>,
    element_errors: HashMap<String, VecDeque<RemoteError>>,
    described: VecDeque<Reply<Option<String>>>,
    dependents: Vec<String>,
}

impl Script {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one `submit` reply.
    #[must_use]
    pub fn submission(mut self, reply: Reply<Submission>) -> Self {
        self.submissions.push_back(reply);
        self
    }

    /// Queue present statuses.
    #[must_use]
    pub fn statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses
            .extend(statuses.into_iter().map(|s| Ok(Some(s.into()))));
        self
    }

    /// Queue a not-found status reply.
    #[must_use]
    pub fn absent(mut self) -> Self {
        self.statuses.push_back(Ok(None));
        self
    }

    /// Queue a failing status query.
    #[must_use]
    pub fn status_error(mut self, error: RemoteError) -> Self {
        self.statuses.push_back(Err(error));
        self
    }

    /// Queue task states.
    #[must_use]
    pub fn tasks(mut self, states: impl IntoIterator<Item = TaskState>) -> Self {
        self.tasks.extend(states.into_iter().map(Ok));
        self
    }

    /// Queue a failing task query.
    #[must_use]
    pub fn task_error(mut self, error: RemoteError) -> Self {
        self.tasks.push_back(Err(error));
        self
    }

    /// Make `apply_element` fail for `element` with `error`, once per call.
    #[must_use]
    pub fn element_error(mut self, element: impl Into<String>, error: RemoteError) -> Self {
        self.element_errors
            .entry(element.into())
            .or_default()
            .push_back(error);
        self
    }

    /// Queue one `describe` reply.
    #[must_use]
    pub fn describe(mut self, reply: Reply<Option<String>>) -> Self {
        self.described.push_back(reply);
        self
    }

    /// Dependents reported as still draining.
    #[must_use]
    pub fn dependents<I, S>(mut self, dependents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents = dependents.into_iter().map(Into::into).collect();
        self
    }
}

/// Pop the next reply, repeating the last one once the queue runs dry.
fn next_sticky<T: Clone>(queue: &mut VecDeque<Reply<T>>, what: &str) -> Reply<T> {
    match queue.len() {
        0 => Err(RemoteError::Other(format!("no scripted {what}"))),
        1 => queue[0].clone(),
        _ => queue
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Other(format!("no scripted {what}")))),
    }
}

#[derive(Debug)]
struct State {
    script: Script,
    journal: Vec<Call>,
}

/// A [`RemoteClient`] that replays a [`Script`].
///
/// Clones share the script and the journal.
#[derive(Debug, Clone)]
pub struct ScriptedClient {
    state: Arc<Mutex<State>>,
}

impl ScriptedClient {
    /// Client replaying `script`.
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script,
                journal: Vec::new(),
            })),
        }
    }

    /// All calls so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.journal.clone()
    }

    /// Number of `submit` calls for the named action.
    pub async fn submit_count(&self, action: &str) -> usize {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|call| matches!(call, Call::Submit { action: a, .. } if *a == action))
            .count()
    }

    async fn record(&self, call: Call) {
        self.state.lock().await.journal.push(call);
    }
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    type Error = RemoteError;
    type Payload = String;
    type Element = String;
    type Observed = String;

    async fn submit(&self, action: Action<'_, String>) -> Result<Submission, RemoteError> {
        let target = match action {
            Action::Create(payload) => Some(payload.clone()),
            Action::Modify { group, .. } => Some(group.to_string()),
            Action::Isolate(id) | Action::Destroy(id) => Some(id.to_string()),
        };
        let mut state = self.state.lock().await;
        state.journal.push(Call::Submit {
            action: action.name(),
            target,
        });
        state
            .script
            .submissions
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Other("no scripted submission".to_string())))
    }

    async fn query_status(&self, id: &ResourceId) -> Result<Option<String>, RemoteError> {
        let mut state = self.state.lock().await;
        state.journal.push(Call::QueryStatus(id.to_string()));
        next_sticky(&mut state.script.statuses, "status")
    }

    async fn query_task(&self, handle: &TaskHandle) -> Result<TaskState, RemoteError> {
        let mut state = self.state.lock().await;
        state.journal.push(Call::QueryTask(handle.to_string()));
        next_sticky(&mut state.script.tasks, "task state")
    }

    async fn apply_element(
        &self,
        _id: &ResourceId,
        group: &str,
        element: &String,
        op: ElementOp,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.journal.push(Call::ApplyElement {
            group: group.to_string(),
            element: element.clone(),
            op,
        });
        match state
            .script
            .element_errors
            .get_mut(element)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn describe(&self, id: &ResourceId) -> Result<Option<String>, RemoteError> {
        self.record(Call::Describe(id.to_string())).await;
        self.state
            .lock()
            .await
            .script
            .described
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn dependents(&self, id: &ResourceId) -> Result<Vec<String>, RemoteError> {
        self.record(Call::Dependents(id.to_string())).await;
        Ok(self.state.lock().await.script.dependents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_queue_repeats_last_entry() {
        let client = ScriptedClient::new(Script::new().statuses(["A", "B"]));
        let id = ResourceId::new("r-1");

        assert_eq!(client.query_status(&id).await.unwrap().as_deref(), Some("A"));
        assert_eq!(client.query_status(&id).await.unwrap().as_deref(), Some("B"));
        assert_eq!(client.query_status(&id).await.unwrap().as_deref(), Some("B"));
        assert_eq!(client.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_submission_fails() {
        let client = ScriptedClient::new(Script::new());
        let id = ResourceId::new("r-1");

        assert!(client.submit(Action::Destroy(&id)).await.is_err());
        assert_eq!(client.submit_count("destroy").await, 1);
    }

    #[tokio::test]
    async fn test_element_errors_are_consumed() {
        let client = ScriptedClient::new(
            Script::new().element_error("sg-1", RemoteError::api("ResourceInUse", "busy")),
        );
        let id = ResourceId::new("r-1");
        let sg = "sg-1".to_string();

        assert!(client.apply_element(&id, "sg", &sg, ElementOp::Add).await.is_err());
        assert!(client.apply_element(&id, "sg", &sg, ElementOp::Add).await.is_ok());
    }
}
