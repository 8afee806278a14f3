//! Append-only event log, one JSON object per line.
//!
//! The log duplicates the in-state `events` list in a form that survives
//! state-file replacement and is cheap to tail while a project runs.

use crate::env;
use crate::state::types::ProjectEvent;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Writer for a project's `events.log`.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(projects_dir: &Path, project_id: &str) -> Self {
        Self {
            path: env::events_file_path(projects_dir, project_id),
        }
    }

    /// Append one event as a JSON line.
    pub async fn append(&self, event: &ProjectEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open event log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append event")?;
        Ok(())
    }

    /// Read the full log back. Lines that fail to parse are skipped;
    /// a torn final line after a crash must not poison the history.
    pub async fn read_all(&self) -> Result<Vec<ProjectEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read event log: {}", self.path.display()))?;

        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::EventKind;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("p1"))
            .await
            .unwrap();
        let log = EventLog::new(dir.path(), "p1");

        log.append(&ProjectEvent::new(EventKind::ProjectCreated))
            .await
            .unwrap();
        log.append(
            &ProjectEvent::new(EventKind::TaskError).with_error_kind("timeout"),
        )
        .await
        .unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ProjectCreated);
        assert_eq!(events[1].error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_torn_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("p1"))
            .await
            .unwrap();
        let log = EventLog::new(dir.path(), "p1");

        log.append(&ProjectEvent::new(EventKind::ProjectCreated))
            .await
            .unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new()
            .append(true)
            .open(crate::env::events_file_path(dir.path(), "p1"))
            .await
            .unwrap();
        file.write_all(b"{\"timestamp\":\"2025-").await.unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
