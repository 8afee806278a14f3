use crate::config::OrchestratorConfig;
use crate::task::{Task, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Project lifecycle state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Executing,
    Complete,
    Failed,
    Paused,
}

/// Per-agent slice of the usage totals
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AgentUsage {
    pub tokens: u64,
    pub calls: u64,
}

/// Aggregate LLM usage for a project
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UsageTotals {
    pub tokens: u64,
    pub calls: u64,
    #[serde(default)]
    pub per_agent: HashMap<String, AgentUsage>,
}

impl UsageTotals {
    /// Record one call by `agent_id` consuming `tokens`.
    pub fn record(&mut self, agent_id: &str, tokens: u64) {
        self.tokens += tokens;
        self.calls += 1;
        let agent = self.per_agent.entry(agent_id.to_string()).or_default();
        agent.tokens += tokens;
        agent.calls += 1;
    }
}

/// Event kinds appearing in the project log
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProjectCreated,
    PlanAccepted,
    PlanFallback,
    StageStarted,
    StageCompleted,
    TaskStarted,
    TaskCompleted,
    TaskError,
    TaskRetried,
    TaskFailed,
    TaskBlocked,
    ResourceDenied,
    RestoredFromBackup,
    ProjectPaused,
    ProjectResumed,
    ProjectCompleted,
    ProjectFailed,
}

/// One entry of the append-only project log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProjectEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProjectEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            task_id: None,
            attempt: None,
            error_kind: None,
            message: None,
        }
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Complete on-disk representation of one project.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Project {
    /// Monotonically increasing write counter; readers refuse regressions
    pub version: u64,
    pub project_id: String,
    pub objective: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub events: Vec<ProjectEvent>,
    #[serde(default)]
    pub usage: UsageTotals,
    pub config_snapshot: OrchestratorConfig,
    /// Unknown fields from newer writers, preserved round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    pub fn new(objective: impl Into<String>, config: OrchestratorConfig) -> Self {
        let now = Utc::now();
        Self {
            version: 0,
            project_id: format!("proj-{}", Uuid::new_v4().simple()),
            objective: objective.into(),
            status: ProjectStatus::Planning,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
            events: Vec::new(),
            usage: UsageTotals::default(),
            config_snapshot: config,
            extra: serde_json::Map::new(),
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// A task is ready when it is queued and every dependency is complete.
    pub fn is_task_ready(&self, id: TaskId) -> bool {
        let Some(task) = self.task(id) else {
            return false;
        };
        task.is_queued()
            && task
                .depends_on
                .iter()
                .all(|dep| self.task(*dep).is_some_and(Task::is_complete))
    }

    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| self.is_task_ready(t.id))
            .map(|t| t.id)
            .collect()
    }

    pub fn all_tasks_complete(&self) -> bool {
        self.tasks.iter().all(Task::is_complete)
    }

    pub fn any_task_queued(&self) -> bool {
        self.tasks.iter().any(Task::is_queued)
    }

    pub fn failed_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count()
    }

    pub fn blocked_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Blocked)
            .count()
    }

    /// Transition every queued task that can no longer become ready to
    /// `blocked`, transitively: a dependency that is failed or already
    /// blocked dooms its whole downstream chain. Returns the ids of the
    /// newly blocked tasks, in dependency order.
    pub fn block_unreachable_dependents(&mut self) -> Vec<TaskId> {
        let mut newly_blocked = Vec::new();

        loop {
            let dead: std::collections::HashSet<TaskId> = self
                .tasks
                .iter()
                .filter(|t| {
                    matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked)
                })
                .map(|t| t.id)
                .collect();

            let mut changed = false;
            for task in &mut self.tasks {
                if task.is_queued() && task.depends_on.iter().any(|d| dead.contains(d)) {
                    task.block(crate::task::TaskFailure {
                        kind: "dependency_failed".to_string(),
                        message: "an upstream task failed permanently".to_string(),
                        attempt: task.attempts,
                    });
                    newly_blocked.push(task.id);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        if !newly_blocked.is_empty() {
            self.updated_at = Utc::now();
        }
        newly_blocked
    }

    /// Append to the in-state event log, keeping timestamps monotonic.
    pub fn record_event(&mut self, mut event: ProjectEvent) {
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                event.timestamp = last.timestamp;
            }
        }
        self.events.push(event);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: ProjectStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Demote every `in_progress` task back to `queued`.
    ///
    /// Runs on load: work that was in flight when the process died was
    /// never durably acknowledged, so it must run again.
    pub fn demote_in_progress(&mut self) -> Vec<TaskId> {
        let mut demoted = Vec::new();
        for task in &mut self.tasks {
            if task.status == TaskStatus::InProgress {
                task.requeue();
                demoted.push(task.id);
            }
        }
        if !demoted.is_empty() {
            self.updated_at = Utc::now();
        }
        demoted
    }

    /// Structural validation used by the store when loading.
    pub fn validate(&self) -> Result<(), String> {
        if self.project_id.is_empty() {
            return Err("empty project_id".to_string());
        }

        let ids: std::collections::HashSet<TaskId> = self.tasks.iter().map(|t| t.id).collect();
        if ids.len() != self.tasks.len() {
            return Err("duplicate task ids".to_string());
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep) {
                    return Err(format!("task {} depends on unknown task {}", task.id, dep));
                }
            }
            if task.status == TaskStatus::InProgress && task.assigned_agent_id.is_none() {
                return Err(format!("in_progress task {} has no assigned agent", task.id));
            }
        }

        Ok(())
    }
}
