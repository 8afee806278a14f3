use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tasks, unique within a project
pub type TaskId = Uuid;

/// Team a task belongs to; drives grouping and lead selection
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    General,
    Frontend,
    Backend,
    Qa,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::General => "general",
            Team::Frontend => "frontend",
            Team::Backend => "backend",
            Team::Qa => "qa",
        }
    }

    /// Parse a team tag leniently; planner output is LLM text.
    pub fn parse(tag: &str) -> Team {
        match tag.trim().to_lowercase().as_str() {
            "frontend" | "front" | "ui" => Team::Frontend,
            "backend" | "back" | "api" | "server" => Team::Backend,
            "qa" | "test" | "testing" | "validation" => Team::Qa,
            _ => Team::General,
        }
    }
}

impl Default for Team {
    fn default() -> Self {
        Team::General
    }
}

/// Worker specialty: an informational sub-tag that selects a prompt
/// template. Never changes the execution contract.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    #[default]
    General,
    Html,
    Css,
    Js,
    Api,
    Db,
    Security,
    QaHtml,
    QaCss,
    QaJs,
    QaPerformance,
}

impl Specialty {
    /// QA specialties carry the hard atomic time bound.
    pub fn is_qa(&self) -> bool {
        matches!(
            self,
            Specialty::QaHtml | Specialty::QaCss | Specialty::QaJs | Specialty::QaPerformance
        )
    }
}

/// Task lifecycle state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Complete,
    Failed,
    Blocked,
}

/// Permanent failure record attached to a task
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskFailure {
    /// Machine-readable kind: `timeout`, `cli_failed`, `encoding_error`,
    /// `atomic_deadline_exceeded`, `retries_exhausted`, ...
    pub kind: String,
    pub message: String,
    /// Attempt on which the failure became permanent
    pub attempt: u32,
}

/// One unit of delegable work
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub team: Team,
    #[serde(default)]
    pub specialty: Specialty,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Locator of the raw-output artifact produced by the last attempt
    #[serde(default)]
    pub result_ref: Option<String>,
    #[serde(default)]
    pub error: Option<TaskFailure>,
    /// Unknown fields from newer writers, preserved round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Specification for creating a task
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    pub team: Team,
    #[serde(default)]
    pub specialty: Specialty,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: spec.title,
            description: spec.description,
            team: spec.team,
            specialty: spec.specialty,
            depends_on: spec.depends_on,
            status: TaskStatus::Queued,
            attempts: 0,
            assigned_agent_id: None,
            started_at: None,
            ended_at: None,
            result_ref: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Terminal states never transition again: `blocked` is terminal
    /// because a permanently failed dependency cannot un-fail.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Blocked
        )
    }

    pub fn is_queued(&self) -> bool {
        self.status == TaskStatus::Queued
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    /// Transition `queued -> in_progress`, stamping start time and agent.
    pub fn begin(&mut self, agent_id: &str) {
        self.status = TaskStatus::InProgress;
        self.assigned_agent_id = Some(agent_id.to_string());
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    /// Transition `in_progress -> complete`.
    pub fn complete(&mut self, result_ref: String) {
        self.status = TaskStatus::Complete;
        self.result_ref = Some(result_ref);
        self.ended_at = Some(Utc::now());
        self.error = None;
    }

    /// Transition `in_progress -> failed` with a permanent error record.
    pub fn fail(&mut self, failure: TaskFailure) {
        self.status = TaskStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(failure);
    }

    /// Transition back to `queued` for another attempt. The retry budget
    /// is enforced by the caller; this only resets execution state.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Queued;
        self.assigned_agent_id = None;
        self.started_at = None;
        self.ended_at = None;
    }

    /// Transition `queued -> blocked`: a dependency failed for good and
    /// this task can never become ready.
    pub fn block(&mut self, failure: TaskFailure) {
        self.status = TaskStatus::Blocked;
        self.error = Some(failure);
    }
}
