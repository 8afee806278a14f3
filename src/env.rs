//! Environment constants and path utilities for the orchestrator.
//!
//! This module centralizes the on-disk layout of a project directory so the
//! rest of the codebase never spells out file names inline.
//!
//! ```text
//! <projects_dir>/<project_id>/
//!   state.json                 canonical project state (atomic writes)
//!   state.json.bak-<ts>        prior versions
//!   events.log                 append-only newline-delimited JSON
//!   artifacts/<task_id>/...    raw LLM outputs
//!   deliverables/...           extracted deliverable files
//!   logs/                      per-run logs
//! ```

use std::path::{Path, PathBuf};

/// Default projects directory name when none is configured
pub const DEFAULT_PROJECTS_DIR_NAME: &str = "projects";

/// Canonical state file name
pub const STATE_FILE_NAME: &str = "state.json";

/// Prefix for timestamped state backups (`state.json.bak-<ts>`)
pub const STATE_BACKUP_PREFIX: &str = "state.json.bak-";

/// Append-only event log file name
pub const EVENTS_FILE_NAME: &str = "events.log";

/// Raw-output artifacts directory name
pub const ARTIFACTS_DIR_NAME: &str = "artifacts";

/// Extracted deliverables directory name
pub const DELIVERABLES_DIR_NAME: &str = "deliverables";

/// Per-run logs directory name
pub const LOGS_DIR_NAME: &str = "logs";

/// Build a project directory path
pub fn project_dir_path(projects_dir: &Path, project_id: &str) -> PathBuf {
    projects_dir.join(project_id)
}

/// Build the canonical state file path for a project
pub fn state_file_path(projects_dir: &Path, project_id: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id).join(STATE_FILE_NAME)
}

/// Build a timestamped state backup path for a project
pub fn state_backup_path(projects_dir: &Path, project_id: &str, timestamp: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id)
        .join(format!("{}{}", STATE_BACKUP_PREFIX, timestamp))
}

/// Build the event log path for a project
pub fn events_file_path(projects_dir: &Path, project_id: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id).join(EVENTS_FILE_NAME)
}

/// Build the artifacts directory path for a task within a project
pub fn task_artifacts_dir_path(projects_dir: &Path, project_id: &str, task_id: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id)
        .join(ARTIFACTS_DIR_NAME)
        .join(task_id)
}

/// Build the deliverables directory path for a project
pub fn deliverables_dir_path(projects_dir: &Path, project_id: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id).join(DELIVERABLES_DIR_NAME)
}

/// Build the per-run logs directory path for a project
pub fn logs_dir_path(projects_dir: &Path, project_id: &str) -> PathBuf {
    project_dir_path(projects_dir, project_id).join(LOGS_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_path_construction() {
        let projects = Path::new("/data/projects");
        let project_id = "proj-123";

        assert_eq!(
            project_dir_path(projects, project_id),
            Path::new("/data/projects/proj-123")
        );

        assert_eq!(
            state_file_path(projects, project_id),
            Path::new("/data/projects/proj-123/state.json")
        );

        assert_eq!(
            state_backup_path(projects, project_id, "20250101T000000"),
            Path::new("/data/projects/proj-123/state.json.bak-20250101T000000")
        );

        assert_eq!(
            events_file_path(projects, project_id),
            Path::new("/data/projects/proj-123/events.log")
        );

        assert_eq!(
            task_artifacts_dir_path(projects, project_id, "task-9"),
            Path::new("/data/projects/proj-123/artifacts/task-9")
        );

        assert_eq!(
            deliverables_dir_path(projects, project_id),
            Path::new("/data/projects/proj-123/deliverables")
        );

        assert_eq!(
            logs_dir_path(projects, project_id),
            Path::new("/data/projects/proj-123/logs")
        );
    }
}
