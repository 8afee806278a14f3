//! Shared write handle over one project's state.
//!
//! The store owns all disk writes; agents never touch the file. They
//! submit typed updates through this handle, which applies them under
//! the project's write lock and persists immediately, so every task
//! transition is durable before the next one can start. Readers get
//! cloned snapshots and never observe a half-applied update.

use crate::state::store::{StateError, StateStore};
use crate::state::types::{EventKind, Project, ProjectEvent, ProjectStatus};
use crate::task::{TaskFailure, TaskId};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Typed mutations accepted by [`ProjectHandle::apply`].
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// `queued -> in_progress`, stamping agent and start time
    TaskStarted { task_id: TaskId, agent_id: String },
    /// `in_progress -> complete` with the raw-output locator
    TaskCompleted { task_id: TaskId, result_ref: String },
    /// Transient failure: back to `queued` for another attempt
    TaskRequeued {
        task_id: TaskId,
        error_kind: String,
        message: String,
    },
    /// Permanent failure
    TaskFailed { task_id: TaskId, failure: TaskFailure },
    /// Aggregate usage bump for one LLM call
    Usage { agent_id: String, tokens: u64 },
    /// Project status change
    Status(ProjectStatus),
    /// Free-form event append
    Event(ProjectEvent),
}

/// Cloneable handle combining the in-memory project and its store.
#[derive(Clone)]
pub struct ProjectHandle {
    project: Arc<Mutex<Project>>,
    store: Arc<StateStore>,
}

impl ProjectHandle {
    pub fn new(project: Project, store: Arc<StateStore>) -> Self {
        Self {
            project: Arc::new(Mutex::new(project)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Immutable snapshot of the current project state.
    pub async fn snapshot(&self) -> Project {
        self.project.lock().await.clone()
    }

    pub async fn project_id(&self) -> String {
        self.project.lock().await.project_id.clone()
    }

    /// Apply one update and persist the result before returning.
    pub async fn apply(&self, update: StateUpdate) -> Result<(), StateError> {
        let mut project = self.project.lock().await;

        let mut events = Vec::new();
        match &update {
            StateUpdate::TaskStarted { task_id, agent_id } => {
                if let Some(task) = project.task_mut(*task_id) {
                    task.begin(agent_id);
                }
                events.push(ProjectEvent::new(EventKind::TaskStarted).with_task(*task_id));
            }
            StateUpdate::TaskCompleted {
                task_id,
                result_ref,
            } => {
                let mut attempt = 0;
                if let Some(task) = project.task_mut(*task_id) {
                    task.complete(result_ref.clone());
                    attempt = task.attempts;
                }
                events.push(
                    ProjectEvent::new(EventKind::TaskCompleted)
                        .with_task(*task_id)
                        .with_attempt(attempt),
                );
            }
            StateUpdate::TaskRequeued {
                task_id,
                error_kind,
                message,
            } => {
                let mut attempt = 0;
                if let Some(task) = project.task_mut(*task_id) {
                    attempt = task.attempts;
                    task.error = Some(TaskFailure {
                        kind: error_kind.clone(),
                        message: message.clone(),
                        attempt,
                    });
                    task.requeue();
                }
                events.push(
                    ProjectEvent::new(EventKind::TaskRetried)
                        .with_task(*task_id)
                        .with_attempt(attempt)
                        .with_error_kind(error_kind.clone())
                        .with_message(message.clone()),
                );
            }
            StateUpdate::TaskFailed { task_id, failure } => {
                if let Some(task) = project.task_mut(*task_id) {
                    task.fail(failure.clone());
                }
                events.push(
                    ProjectEvent::new(EventKind::TaskFailed)
                        .with_task(*task_id)
                        .with_attempt(failure.attempt)
                        .with_error_kind(failure.kind.clone())
                        .with_message(failure.message.clone()),
                );

                // A permanent failure dooms everything downstream of it;
                // mark the whole chain so it never looks executable.
                for blocked_id in project.block_unreachable_dependents() {
                    events.push(
                        ProjectEvent::new(EventKind::TaskBlocked)
                            .with_task(blocked_id)
                            .with_error_kind("dependency_failed")
                            .with_message(format!("unreachable after task {} failed", task_id)),
                    );
                }
            }
            StateUpdate::Usage { agent_id, tokens } => {
                project.usage.record(agent_id, *tokens);
            }
            StateUpdate::Status(status) => {
                project.set_status(*status);
            }
            StateUpdate::Event(event) => events.push(event.clone()),
        }

        for event in events {
            self.store.append_event(&project.project_id, &event).await?;
            project.record_event(event);
        }

        self.store.save(&mut project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::task::{Specialty, Task, TaskSpec, TaskStatus, Team};

    async fn handle_with_task() -> (tempfile::TempDir, ProjectHandle, TaskId) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let mut project = store
            .create("objective", OrchestratorConfig::default())
            .await
            .unwrap();

        let task = Task::new(TaskSpec {
            title: "t".to_string(),
            description: "d".to_string(),
            team: Team::General,
            specialty: Specialty::General,
            depends_on: Vec::new(),
        });
        let task_id = task.id;
        project.tasks.push(task);
        store.save(&mut project).await.unwrap();

        (dir, ProjectHandle::new(project, store), task_id)
    }

    #[tokio::test]
    async fn test_transitions_are_persisted_immediately() {
        let (_dir, handle, task_id) = handle_with_task().await;

        handle
            .apply(StateUpdate::TaskStarted {
                task_id,
                agent_id: "worker-1".to_string(),
            })
            .await
            .unwrap();

        // A fresh load from disk already sees the transition.
        let project_id = handle.project_id().await;
        let loaded = handle.store().load(&project_id).await.unwrap();
        assert_eq!(loaded.task(task_id).unwrap().status, TaskStatus::InProgress);

        handle
            .apply(StateUpdate::TaskCompleted {
                task_id,
                result_ref: "artifacts/x/raw_output.txt".to_string(),
            })
            .await
            .unwrap();

        let loaded = handle.store().load(&project_id).await.unwrap();
        assert_eq!(loaded.task(task_id).unwrap().status, TaskStatus::Complete);
        assert!(
            loaded
                .events
                .iter()
                .any(|e| e.kind == EventKind::TaskCompleted)
        );
    }

    #[tokio::test]
    async fn test_requeue_keeps_error_context() {
        let (_dir, handle, task_id) = handle_with_task().await;

        handle
            .apply(StateUpdate::TaskStarted {
                task_id,
                agent_id: "worker-1".to_string(),
            })
            .await
            .unwrap();
        handle
            .apply(StateUpdate::TaskRequeued {
                task_id,
                error_kind: "timeout".to_string(),
                message: "deadline expired".to_string(),
            })
            .await
            .unwrap();

        let snapshot = handle.snapshot().await;
        let task = snapshot.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.error.as_ref().unwrap().kind, "timeout");

        let retried = snapshot
            .events
            .iter()
            .find(|e| e.kind == EventKind::TaskRetried)
            .unwrap();
        assert_eq!(retried.error_kind.as_deref(), Some("timeout"));
        assert_eq!(retried.attempt, Some(1));
    }

    #[tokio::test]
    async fn test_permanent_failure_blocks_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path()));
        let mut project = store
            .create("objective", OrchestratorConfig::default())
            .await
            .unwrap();

        let first = Task::new(TaskSpec {
            title: "first".to_string(),
            description: "d".to_string(),
            team: Team::General,
            specialty: Specialty::General,
            depends_on: Vec::new(),
        });
        let second = Task::new(TaskSpec {
            title: "second".to_string(),
            description: "d".to_string(),
            team: Team::General,
            specialty: Specialty::General,
            depends_on: vec![first.id],
        });
        let (first_id, second_id) = (first.id, second.id);
        project.tasks = vec![first, second];
        store.save(&mut project).await.unwrap();
        let handle = ProjectHandle::new(project, Arc::clone(&store));

        handle
            .apply(StateUpdate::TaskStarted {
                task_id: first_id,
                agent_id: "worker-1".to_string(),
            })
            .await
            .unwrap();
        handle
            .apply(StateUpdate::TaskFailed {
                task_id: first_id,
                failure: TaskFailure {
                    kind: "retries_exhausted".to_string(),
                    message: "gave up".to_string(),
                    attempt: 3,
                },
            })
            .await
            .unwrap();

        // The dependent is blocked in the same persisted update.
        let project_id = handle.project_id().await;
        let loaded = handle.store().load(&project_id).await.unwrap();
        assert_eq!(loaded.task(second_id).unwrap().status, TaskStatus::Blocked);
        assert!(!loaded.task(second_id).unwrap().is_queued());

        let blocked_event = loaded
            .events
            .iter()
            .find(|e| e.kind == EventKind::TaskBlocked)
            .unwrap();
        assert_eq!(blocked_event.task_id, Some(second_id));
        assert_eq!(blocked_event.error_kind.as_deref(), Some("dependency_failed"));
    }

    #[tokio::test]
    async fn test_usage_update() {
        let (_dir, handle, _) = handle_with_task().await;

        handle
            .apply(StateUpdate::Usage {
                agent_id: "worker-1".to_string(),
                tokens: 250,
            })
            .await
            .unwrap();

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.usage.calls, 1);
        assert_eq!(snapshot.usage.tokens, 250);
    }
}
