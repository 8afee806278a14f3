//! Team lead: bounded-concurrency execution of one task group.
//!
//! The lead owns a pool of `min(tasks, max_workers)` slots; the first
//! free slot takes the next task, so intra-group ordering is not
//! observable and callers must not rely on it. One worker's failure
//! never cancels its peers; the lead just counts outcomes and reports.

use crate::agent::prompts;
use crate::agent::worker::{AgentContext, TaskOutcome, Worker};
use crate::state::ProjectHandle;
use crate::task::{Specialty, TaskId, Team};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outcome counts for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub success: usize,
    pub failed: usize,
    pub requeued: usize,
}

impl GroupSummary {
    fn absorb(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.success += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Requeued => self.requeued += 1,
        }
    }
}

/// Lead for one team's tasks.
pub struct TeamLead {
    team: Team,
    ctx: Arc<AgentContext>,
}

impl TeamLead {
    pub fn new(team: Team, ctx: Arc<AgentContext>) -> Self {
        Self { team, ctx }
    }

    /// Pick the worker specialty for a task description.
    ///
    /// Validation-flavored descriptions get a specialty-matched worker
    /// (which carries the atomic time bound for QA); everything else
    /// gets a general worker.
    fn specialty_for_task(&self, description: &str) -> Specialty {
        if self.team == Team::Qa || prompts::is_atomic_validation(description) {
            prompts::specialty_for(self.team, description)
        } else {
            Specialty::General
        }
    }

    /// Execute `task_ids` with at most `max_workers` running at once.
    pub async fn run_group(
        &self,
        handle: &ProjectHandle,
        task_ids: &[TaskId],
        max_workers: usize,
    ) -> GroupSummary {
        let pool = max_workers.min(task_ids.len()).max(1);
        let slots = Arc::new(Semaphore::new(pool));
        let mut join_set = JoinSet::new();

        info!(
            team = self.team.as_str(),
            tasks = task_ids.len(),
            pool,
            "team lead dispatching group"
        );

        let snapshot = handle.snapshot().await;
        for &task_id in task_ids {
            let description = snapshot
                .task(task_id)
                .map(|t| format!("{} {}", t.title, t.description))
                .unwrap_or_default();
            let specialty = self.specialty_for_task(&description);

            let worker = Worker::new(specialty, Arc::clone(&self.ctx));
            let handle = handle.clone();
            let slots = Arc::clone(&slots);

            join_set.spawn(async move {
                let _permit = slots.acquire_owned().await.expect("semaphore open");
                worker.execute(&handle, task_id).await
            });
        }

        let mut summary = GroupSummary::default();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(outcome)) => summary.absorb(outcome),
                Ok(Err(e)) => {
                    warn!(team = self.team.as_str(), "worker errored: {:#}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(team = self.team.as_str(), "worker panicked: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            team = self.team.as_str(),
            success = summary.success,
            failed = summary.failed,
            requeued = summary.requeued,
            "group finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactExtractor;
    use crate::config::OrchestratorConfig;
    use crate::llm::invoker::ScriptedInvoker;
    use crate::llm::{InvokeError, ProviderRegistry};
    use crate::state::{ProjectHandle, StateStore};
    use crate::task::{Task, TaskSpec, TaskStatus};
    use std::time::Duration;

    fn context(invoker: ScriptedInvoker, projects_dir: &std::path::Path) -> Arc<AgentContext> {
        let mut config = OrchestratorConfig::default();
        config.projects_dir = projects_dir.to_path_buf();
        Arc::new(AgentContext {
            invoker: Arc::new(invoker),
            registry: ProviderRegistry::new(Default::default()),
            extractor: ArtifactExtractor::new(projects_dir),
            config,
        })
    }

    async fn project_with_tasks(
        projects_dir: &std::path::Path,
        count: usize,
        team: Team,
    ) -> (ProjectHandle, Vec<TaskId>) {
        let store = Arc::new(StateStore::new(projects_dir));
        let mut project = store
            .create("objective", OrchestratorConfig::default())
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..count {
            let task = Task::new(TaskSpec {
                title: format!("task {}", i),
                description: "write the summary".to_string(),
                team,
                specialty: Specialty::General,
                depends_on: Vec::new(),
            });
            ids.push(task.id);
            project.tasks.push(task);
        }
        store.save(&mut project).await.unwrap();
        (ProjectHandle::new(project, store), ids)
    }

    #[tokio::test]
    async fn test_group_runs_all_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(ScriptedInvoker::new(), dir.path());
        let (handle, ids) = project_with_tasks(dir.path(), 4, Team::General).await;

        let lead = TeamLead::new(Team::General, ctx);
        let summary = lead.run_group(&handle, &ids, 2).await;

        assert_eq!(summary.success, 4);
        assert_eq!(summary.failed, 0);

        let snapshot = handle.snapshot().await;
        assert!(snapshot.tasks.iter().all(|t| t.status == TaskStatus::Complete));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_cancel_peers() {
        let dir = tempfile::tempdir().unwrap();
        // One scripted hard failure; remaining calls echo and succeed.
        let ctx = context(
            ScriptedInvoker::new().push_err(InvokeError::Encoding {
                detail: "bad bytes".to_string(),
            }),
            dir.path(),
        );
        let (handle, ids) = project_with_tasks(dir.path(), 3, Team::General).await;

        let lead = TeamLead::new(Team::General, ctx);
        let summary = lead.run_group(&handle, &ids, 1).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success, 2);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            ScriptedInvoker::new().with_call_delay(Duration::from_millis(50)),
            dir.path(),
        );
        let (handle, ids) = project_with_tasks(dir.path(), 6, Team::General).await;

        let lead = TeamLead::new(Team::General, Arc::clone(&ctx));
        let start = std::time::Instant::now();
        let summary = lead.run_group(&handle, &ids, 3).await;
        let elapsed = start.elapsed();

        assert_eq!(summary.success, 6);
        // 6 tasks at 50ms each on 3 slots needs at least two waves.
        assert!(elapsed >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_qa_lead_uses_specialty_workers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(ScriptedInvoker::new(), dir.path());
        let store = Arc::new(StateStore::new(dir.path()));
        let mut project = store
            .create("objective", OrchestratorConfig::default())
            .await
            .unwrap();
        let task = Task::new(TaskSpec {
            title: "Validate HTML structure".to_string(),
            description: "check the markup for the landing page".to_string(),
            team: Team::Qa,
            specialty: Specialty::QaHtml,
            depends_on: Vec::new(),
        });
        let task_id = task.id;
        project.tasks.push(task);
        store.save(&mut project).await.unwrap();
        let handle = ProjectHandle::new(project, store);

        let lead = TeamLead::new(Team::Qa, ctx);
        let summary = lead.run_group(&handle, &[task_id], 1).await;
        assert_eq!(summary.success, 1);

        // The assigned agent id carries the qa template tag.
        let snapshot = handle.snapshot().await;
        let agent = snapshot
            .task(task_id)
            .unwrap()
            .assigned_agent_id
            .clone()
            .unwrap();
        assert!(agent.contains("qa_html"), "agent id was {}", agent);
    }
}
