use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an artifact is to the project
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Verbatim LLM output for one task
    RawOutput,
    /// Named file extracted from a raw output
    Deliverable,
}

/// Metadata for one persisted artifact
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArtifactMeta {
    pub project_id: String,
    pub task_id: String,
    pub kind: ArtifactKind,
    /// File name within its namespace
    pub name: String,
    /// Path relative to the project directory
    pub path: String,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the written bytes
    pub sha: String,
}

/// Result of extracting one raw output
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub raw: ArtifactMeta,
    pub deliverables: Vec<ArtifactMeta>,
}

impl ExtractionOutcome {
    /// Locator stored on the task as `result_ref`.
    pub fn result_ref(&self) -> String {
        self.raw.path.clone()
    }
}
