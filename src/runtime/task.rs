// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracking of asynchronous remote operations.
//!
//! Many control plane mutations return a task (flow, request, job) handle and
//! finish in the background. The [`TaskTracker`] retries the submission until
//! a handle is obtained, then only polls that handle: once the remote side has
//! accepted the work it is never submitted again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::backoff::{BackoffStrategy, ExponentialBackoff, FixedBackoff};
use super::classify::{ClassifyError, ErrorKind};
use super::poll::{Observation, Poller, StatusClass, StatusPartition};
use super::retry::RetryPolicy;
use crate::error::{ReconcileError, Result};
use crate::identity::{ResourceId, TaskHandle};

/// Remote state of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted but not started.
    Submitted,
    /// In progress.
    Running,
    /// Finished successfully, possibly naming the resource it produced.
    Succeeded {
        /// Identity of the created resource, when the task reports one.
        resource_id: Option<ResourceId>,
    },
    /// Finished with a failure.
    Failed {
        /// Remote failure description.
        reason: String,
    },
    /// A state string the client could not map.
    Unrecognized(String),
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "SUBMITTED"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Succeeded { .. } => write!(f, "SUCCEEDED"),
            TaskState::Failed { .. } => write!(f, "FAILED"),
            TaskState::Unrecognized(state) => write!(f, "{state}"),
        }
    }
}

/// The fixed partition of [`TaskState`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPartition;

impl StatusPartition<TaskState> for TaskPartition {
    fn classify(&self, state: &TaskState) -> StatusClass {
        match state {
            TaskState::Submitted | TaskState::Running => StatusClass::Pending,
            TaskState::Succeeded { .. } => StatusClass::Success,
            TaskState::Failed { .. } => StatusClass::Failure,
            TaskState::Unrecognized(_) => StatusClass::Unknown,
        }
    }
}

/// Result of a submit-type call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The remote side finished the work synchronously.
    Completed {
        /// Identity of the affected resource, if returned.
        resource_id: Option<ResourceId>,
    },
    /// The remote side accepted the work and returned a handle to poll.
    Accepted {
        /// Handle to poll.
        task: TaskHandle,
        /// Identity of the resource, if already known at submission time.
        resource_id: Option<ResourceId>,
    },
}

/// A resolved task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Handle that was polled, or `None` for a synchronous completion.
    pub handle: Option<TaskHandle>,
    /// Resource identity reported at submission or on completion.
    pub resource_id: Option<ResourceId>,
}

/// Submits once, then polls the returned handle to completion.
#[derive(Debug, Clone)]
pub struct TaskTracker<R: BackoffStrategy = ExponentialBackoff, P: BackoffStrategy = FixedBackoff>
{
    submit_policy: RetryPolicy<R>,
    poller: Poller<P>,
}

impl<R: BackoffStrategy, P: BackoffStrategy> TaskTracker<R, P> {
    /// Create a tracker from a submission policy and a task poller.
    pub fn new(submit_policy: RetryPolicy<R>, poller: Poller<P>) -> Self {
        Self {
            submit_policy,
            poller,
        }
    }

    /// The poller used for task handles.
    pub fn poller(&self) -> &Poller<P> {
        &self.poller
    }

    /// Retry `submit` until the remote side accepts or completes the work.
    ///
    /// # Errors
    ///
    /// Fatal and deadline errors from the retry executor.
    pub async fn submit<E, F, Fut>(&self, operation: &str, submit: F) -> Result<Submission>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Submission, E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        self.submit_policy.execute(operation, submit).await
    }

    /// Poll `handle` until the task succeeds or fails.
    ///
    /// A not-found query error counts as pending, bounded by the poller's
    /// not-found check limit.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::TaskFailed`] when the task reports a failure.
    /// - Poller errors for unrecognized states, fatal query errors and
    ///   deadline expiry.
    pub async fn track<E, F, Fut>(
        &self,
        operation: &str,
        handle: &TaskHandle,
        mut query: F,
    ) -> Result<Option<ResourceId>>
    where
        F: FnMut(TaskHandle) -> Fut,
        Fut: Future<Output = std::result::Result<TaskState, E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let observed = self
            .poller
            .wait_for(operation, &TaskPartition, || {
                let pending = query(handle.clone());
                let failure = failure.clone();
                async move {
                    let state = match pending.await {
                        Ok(state) => state,
                        // A fresh handle may not be visible yet.
                        Err(err) if matches!(err.error_kind(), ErrorKind::NotFound) => {
                            return Ok(Observation::Absent);
                        }
                        Err(err) => return Err(err),
                    };
                    if let TaskState::Failed { reason } = &state {
                        *failure.lock().await = Some(reason.clone());
                    }
                    Ok::<_, E>(Observation::Present(state))
                }
            })
            .await;

        match observed {
            Ok(Observation::Present(TaskState::Succeeded { resource_id })) => {
                debug!(operation, task = %handle, "task succeeded");
                Ok(resource_id)
            }
            Ok(_) => Ok(None),
            Err(ReconcileError::FailureStatus { .. }) => {
                let reason = failure
                    .lock()
                    .await
                    .take()
                    .unwrap_or_else(|| "unspecified".to_string());
                Err(ReconcileError::TaskFailed {
                    handle: handle.clone(),
                    reason,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Submit the work and, if it was accepted asynchronously, track it.
    ///
    /// # Errors
    ///
    /// Errors from [`submit`](Self::submit) and [`track`](Self::track).
    pub async fn run<E, S, SFut, Q, QFut>(
        &self,
        operation: &str,
        submit: S,
        query: Q,
    ) -> Result<TaskOutcome>
    where
        S: FnMut() -> SFut,
        SFut: Future<Output = std::result::Result<Submission, E>>,
        Q: FnMut(TaskHandle) -> QFut,
        QFut: Future<Output = std::result::Result<TaskState, E>>,
        E: ClassifyError + std::error::Error + Send + Sync + 'static,
    {
        match self.submit(operation, submit).await? {
            Submission::Completed { resource_id } => Ok(TaskOutcome {
                handle: None,
                resource_id,
            }),
            Submission::Accepted { task, resource_id } => {
                info!(operation, task = %task, "tracking asynchronous task");
                let reported = self.track(operation, &task, query).await?;
                Ok(TaskOutcome {
                    handle: Some(task),
                    resource_id: reported.or(resource_id),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::runtime::NoBackoff;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn tracker() -> TaskTracker<NoBackoff, FixedBackoff> {
        TaskTracker::new(
            RetryPolicy::builder()
                .deadline(Duration::from_secs(30))
                .backoff(NoBackoff::new())
                .build(),
            Poller::new(Duration::from_secs(60)).with_interval(Duration::from_secs(1)),
        )
    }

    fn states(
        states: Vec<TaskState>,
    ) -> Arc<Mutex<VecDeque<std::result::Result<TaskState, RemoteError>>>> {
        Arc::new(Mutex::new(states.into_iter().map(Ok).collect()))
    }

    #[test]
    fn test_partition() {
        let p = TaskPartition;
        assert_eq!(p.classify(&TaskState::Submitted), StatusClass::Pending);
        assert_eq!(p.classify(&TaskState::Running), StatusClass::Pending);
        assert_eq!(
            p.classify(&TaskState::Succeeded { resource_id: None }),
            StatusClass::Success
        );
        assert_eq!(
            p.classify(&TaskState::Failed {
                reason: "x".to_string()
            }),
            StatusClass::Failure
        );
        assert_eq!(
            p.classify(&TaskState::Unrecognized("PAUSED".to_string())),
            StatusClass::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_retried_until_handle_then_polled_once_each() {
        let submits = Arc::new(AtomicU32::new(0));
        let script = states(vec![
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Succeeded {
                resource_id: Some(ResourceId::new("lb-1")),
            },
        ]);

        let outcome = tracker()
            .run(
                "create lb",
                || {
                    let submits = submits.clone();
                    async move {
                        if submits.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(RemoteError::api("RequestLimitExceeded", "throttled"))
                        } else {
                            Ok(Submission::Accepted {
                                task: TaskHandle::new("req-9"),
                                resource_id: None,
                            })
                        }
                    }
                },
                |handle| {
                    let script = script.clone();
                    async move {
                        assert_eq!(handle.as_str(), "req-9");
                        script.lock().await.pop_front().unwrap()
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(submits.load(Ordering::SeqCst), 2);
        assert!(script.lock().await.is_empty());
        assert_eq!(outcome.handle, Some(TaskHandle::new("req-9")));
        assert_eq!(outcome.resource_id, Some(ResourceId::new("lb-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_is_never_resubmitted() {
        let submits = Arc::new(AtomicU32::new(0));
        let script = states(vec![
            TaskState::Running,
            TaskState::Failed {
                reason: "quota exhausted".to_string(),
            },
        ]);

        let err = tracker()
            .run(
                "resize disk",
                || {
                    let submits = submits.clone();
                    async move {
                        submits.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, RemoteError>(Submission::Accepted {
                            task: TaskHandle::from(42_u64),
                            resource_id: None,
                        })
                    }
                },
                |_| {
                    let script = script.clone();
                    async move { script.lock().await.pop_front().unwrap() }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(submits.load(Ordering::SeqCst), 1);
        match err {
            ReconcileError::TaskFailed { handle, reason } => {
                assert_eq!(handle.as_str(), "42");
                assert_eq!(reason, "quota exhausted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_synchronous_completion_skips_polling() {
        let outcome = tracker()
            .run(
                "attach",
                || async {
                    Ok::<_, RemoteError>(Submission::Completed {
                        resource_id: Some(ResourceId::new("eni-1")),
                    })
                },
                |_| async {
                    Err::<TaskState, _>(RemoteError::Other("no task to poll".to_string()))
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.handle, None);
        assert_eq!(outcome.resource_id, Some(ResourceId::new("eni-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_task_state_is_fatal() {
        let script = states(vec![TaskState::Unrecognized("PAUSED".to_string())]);

        let err = tracker()
            .track("wait task", &TaskHandle::new("t-1"), |_| {
                let script = script.clone();
                async move { script.lock().await.pop_front().unwrap() }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::UnknownStatus { ref status, .. } if status == "PAUSED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_not_yet_visible_keeps_polling() {
        let script: Arc<Mutex<VecDeque<std::result::Result<TaskState, RemoteError>>>> =
            Arc::new(Mutex::new(VecDeque::from([
                Err(RemoteError::NotFound("flow-1".to_string())),
                Ok(TaskState::Succeeded {
                    resource_id: Some(ResourceId::new("cdb-1")),
                }),
            ])));

        let reported = tracker()
            .track("create", &TaskHandle::new("flow-1"), |_| {
                let script = script.clone();
                async move { script.lock().await.pop_front().unwrap() }
            })
            .await
            .unwrap();

        assert_eq!(reported, Some(ResourceId::new("cdb-1")));
        assert!(script.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_that_never_appears_hits_check_limit() {
        let polls = Arc::new(AtomicU32::new(0));
        let tracker = TaskTracker::new(
            RetryPolicy::builder().backoff(NoBackoff::new()).build(),
            Poller::new(Duration::from_secs(60))
                .with_interval(Duration::from_secs(1))
                .with_not_found_checks(3),
        );

        let err = tracker
            .track("create", &TaskHandle::new("flow-2"), |handle| {
                let polls = polls.clone();
                async move {
                    polls.fetch_add(1, Ordering::SeqCst);
                    Err::<TaskState, _>(RemoteError::NotFound(handle.to_string()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::NeverAppeared { checks: 3, .. }));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_task_hits_deadline() {
        let start = tokio::time::Instant::now();
        let tracker = TaskTracker::new(
            RetryPolicy::builder().backoff(NoBackoff::new()).build(),
            Poller::new(Duration::from_secs(5)).with_interval(Duration::from_secs(2)),
        );

        let err = tracker
            .track("resize disk", &TaskHandle::new("t-7"), |_| async {
                Ok::<_, RemoteError>(TaskState::Running)
            })
            .await
            .unwrap_err();

        assert!(err.is_deadline_exceeded());
        assert!(!err.is_remote_failure());
        assert_eq!(err.last_status(), Some("RUNNING"));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
