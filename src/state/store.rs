//! Atomic, versioned persistence for project state.
//!
//! `save` never writes the canonical file in place: the new state goes
//! to a sibling temp file, is fsynced, and is renamed over
//! `state.json`; the prior version is copied aside as a timestamped
//! backup first, and the containing directory is fsynced after the
//! rename so the replacement itself is durable. `load` falls back to
//! the newest valid backup when the canonical file fails validation.
//!
//! Every write bumps a monotonically increasing `version`; a loader
//! that has already observed a newer version refuses the older file,
//! which fences off stale writes from a concurrently running
//! orchestrator.

use crate::config::OrchestratorConfig;
use crate::env;
use crate::state::events::EventLog;
use crate::state::types::{EventKind, Project, ProjectEvent};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// How many timestamped backups to keep per project
const BACKUP_RETENTION: usize = 5;

/// State persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("project {0} not found")]
    NotFound(String),
    #[error("state for project {project_id} failed validation and no valid backup exists: {detail}")]
    Corrupt { project_id: String, detail: String },
    #[error("stale state file: version {found} is older than already-observed {observed}")]
    StaleVersion { found: u64, observed: u64 },
    #[error("backup {0} not found")]
    BackupNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store with sole ownership of state-file writes.
///
/// Mutators hold the per-project write lock for the duration of a save;
/// readers see either the pre- or post-image, never a torn file.
#[derive(Debug)]
pub struct StateStore {
    projects_dir: PathBuf,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
    observed_versions: DashMap<String, u64>,
}

impl StateStore {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            write_locks: DashMap::new(),
            observed_versions: DashMap::new(),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn event_log(&self, project_id: &str) -> EventLog {
        EventLog::new(&self.projects_dir, project_id)
    }

    fn lock_for(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a new project on disk with its directory skeleton.
    pub async fn create(
        &self,
        objective: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Result<Project, StateError> {
        let mut project = Project::new(objective, config);

        let dir = env::project_dir_path(&self.projects_dir, &project.project_id);
        fs::create_dir_all(dir.join(env::ARTIFACTS_DIR_NAME)).await?;
        fs::create_dir_all(dir.join(env::DELIVERABLES_DIR_NAME)).await?;
        fs::create_dir_all(dir.join(env::LOGS_DIR_NAME)).await?;

        self.record(&mut project, ProjectEvent::new(EventKind::ProjectCreated))
            .await?;
        self.save(&mut project).await?;

        info!(project_id = %project.project_id, "project created");
        Ok(project)
    }

    /// Load a project, restoring from the newest valid backup when the
    /// canonical file fails validation.
    pub async fn load(&self, project_id: &str) -> Result<Project, StateError> {
        let canonical = env::state_file_path(&self.projects_dir, project_id);
        if !canonical.exists() {
            return Err(StateError::NotFound(project_id.to_string()));
        }

        match Self::try_parse(&canonical).await {
            Ok(project) => {
                self.fence_version(project_id, project.version)?;
                Ok(project)
            }
            Err(detail) => {
                warn!(project_id, %detail, "state file invalid, trying backups");
                self.restore_newest_backup(project_id, detail).await
            }
        }
    }

    /// Atomically persist `project`, bumping its version.
    pub async fn save(&self, project: &mut Project) -> Result<(), StateError> {
        let lock = self.lock_for(&project.project_id);
        let _guard = lock.lock().await;

        project.version += 1;
        project.updated_at = chrono::Utc::now();

        let dir = env::project_dir_path(&self.projects_dir, &project.project_id);
        fs::create_dir_all(&dir).await?;

        let canonical = env::state_file_path(&self.projects_dir, &project.project_id);
        let tmp = dir.join(format!(".state.json.tmp-{}", Uuid::new_v4().simple()));

        let bytes = serde_json::to_vec_pretty(project)?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if canonical.exists() {
            let backup = env::state_backup_path(
                &self.projects_dir,
                &project.project_id,
                &Self::backup_timestamp(),
            );
            fs::copy(&canonical, &backup).await?;
        }

        fs::rename(&tmp, &canonical).await?;
        Self::sync_dir(&dir)?;

        self.observed_versions
            .insert(project.project_id.clone(), project.version);

        self.prune_backups(&project.project_id).await?;
        Ok(())
    }

    /// Append an event to both the in-state log and `events.log`.
    pub async fn record(
        &self,
        project: &mut Project,
        event: ProjectEvent,
    ) -> Result<(), StateError> {
        self.append_event(&project.project_id, &event).await?;
        project.record_event(event);
        Ok(())
    }

    /// Append an event to `events.log` only.
    pub async fn append_event(
        &self,
        project_id: &str,
        event: &ProjectEvent,
    ) -> Result<(), StateError> {
        let dir = env::project_dir_path(&self.projects_dir, project_id);
        fs::create_dir_all(&dir).await?;
        self.event_log(project_id)
            .append(event)
            .await
            .map_err(|e| StateError::Io(std::io::Error::other(e)))
    }

    /// Copy the canonical file aside and return the backup id.
    pub async fn snapshot(&self, project_id: &str) -> Result<String, StateError> {
        let canonical = env::state_file_path(&self.projects_dir, project_id);
        if !canonical.exists() {
            return Err(StateError::NotFound(project_id.to_string()));
        }

        let timestamp = Self::backup_timestamp();
        let backup = env::state_backup_path(&self.projects_dir, project_id, &timestamp);
        fs::copy(&canonical, &backup).await?;

        Ok(backup
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// Replace the canonical file with the named backup.
    pub async fn restore(&self, project_id: &str, backup_id: &str) -> Result<Project, StateError> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let dir = env::project_dir_path(&self.projects_dir, project_id);
        let backup = dir.join(backup_id);
        if !backup.exists() {
            return Err(StateError::BackupNotFound(backup_id.to_string()));
        }

        let project = Self::try_parse(&backup)
            .await
            .map_err(|detail| StateError::Corrupt {
                project_id: project_id.to_string(),
                detail,
            })?;

        let canonical = env::state_file_path(&self.projects_dir, project_id);
        let tmp = dir.join(format!(".state.json.tmp-{}", Uuid::new_v4().simple()));
        fs::copy(&backup, &tmp).await?;
        fs::rename(&tmp, &canonical).await?;
        Self::sync_dir(&dir)?;

        // Restoring deliberately rewinds; reset the fence to match.
        self.observed_versions
            .insert(project_id.to_string(), project.version);

        info!(project_id, backup_id, "state restored from backup");
        Ok(project)
    }

    /// Backup file names for a project, newest first.
    pub async fn list_backups(&self, project_id: &str) -> Result<Vec<String>, StateError> {
        let dir = env::project_dir_path(&self.projects_dir, project_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(env::STATE_BACKUP_PREFIX) {
                names.push(name);
            }
        }

        // Timestamp suffixes sort lexically.
        names.sort();
        names.reverse();
        Ok(names)
    }

    async fn restore_newest_backup(
        &self,
        project_id: &str,
        first_failure: String,
    ) -> Result<Project, StateError> {
        let dir = env::project_dir_path(&self.projects_dir, project_id);

        for name in self.list_backups(project_id).await? {
            match Self::try_parse(&dir.join(&name)).await {
                Ok(_) => {
                    let mut restored = self.restore(project_id, &name).await?;
                    let event = ProjectEvent::new(EventKind::RestoredFromBackup)
                        .with_message(name.clone());
                    self.append_event(project_id, &event).await?;
                    restored.record_event(event);
                    return Ok(restored);
                }
                Err(detail) => {
                    warn!(project_id, backup = %name, %detail, "backup also invalid");
                }
            }
        }

        Err(StateError::Corrupt {
            project_id: project_id.to_string(),
            detail: first_failure,
        })
    }

    async fn try_parse(path: &Path) -> Result<Project, String> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        let project: Project =
            serde_json::from_slice(&bytes).map_err(|e| format!("parse failed: {}", e))?;
        project.validate()?;
        Ok(project)
    }

    fn fence_version(&self, project_id: &str, found: u64) -> Result<(), StateError> {
        if let Some(observed) = self.observed_versions.get(project_id) {
            if found < *observed {
                return Err(StateError::StaleVersion {
                    found,
                    observed: *observed,
                });
            }
        }
        self.observed_versions.insert(project_id.to_string(), found);
        Ok(())
    }

    async fn prune_backups(&self, project_id: &str) -> Result<(), StateError> {
        let backups = self.list_backups(project_id).await?;
        if backups.len() <= BACKUP_RETENTION {
            return Ok(());
        }

        let dir = env::project_dir_path(&self.projects_dir, project_id);
        for name in &backups[BACKUP_RETENTION..] {
            if let Err(e) = fs::remove_file(dir.join(name)).await {
                warn!(project_id, backup = %name, "failed to prune backup: {}", e);
            }
        }
        Ok(())
    }

    fn backup_timestamp() -> String {
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> std::io::Result<()> {
        std::fs::File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> std::io::Result<()> {
        Ok(())
    }
}
