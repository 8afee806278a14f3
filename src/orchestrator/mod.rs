//! Stage-by-stage project execution.
//!
//! The orchestrator owns the run lifecycle: load (or create) the
//! project, plan if it has no tasks yet, then repeatedly recompute the
//! execution plan and drive the earliest stage that still has queued
//! work. Groups within a stage run concurrently under resource
//! admission; stages run strictly in order. Every group summary is
//! followed by a persisted state snapshot, so a crash at any point
//! resumes from the last completed transition.
//!
//! Pause is cooperative: a pause signal stops new dispatches between
//! stages while in-flight subprocesses run to their own deadlines.

use crate::agent::worker::AgentContext;
use crate::agent::{GroupSummary, ProjectManager, TeamLead};
use crate::artifact::ArtifactExtractor;
use crate::config::OrchestratorConfig;
use crate::env;
use crate::llm::{CliInvoker, LlmInvoker, ProviderRegistry};
use crate::resource::{ResourceManager, ResourceRequest};
use crate::state::{
    EventKind, ProjectEvent, ProjectHandle, ProjectStatus, StateStore, StateUpdate,
};
use crate::task::{DependencyAnalyzer, Stage, TaskId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Parallelism score at or above which hybrid mode goes parallel
const PARALLELISM_THRESHOLD: f64 = 1.5;

/// Bounded wait for group admission before skipping to the next round
const ADMISSION_RETRIES: u32 = 20;
const ADMISSION_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Consecutive stage passes a group may be denied admission before the
/// project fails with `resource_starvation`. Worker retries are bounded
/// by the per-task attempt budget; this is the matching bound for
/// admission deferrals, which never touch a task's attempts.
const ADMISSION_STARVATION_LIMIT: u32 = 3;

/// Execution mode for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One worker at a time, every stage
    Sequential,
    /// Strategy-sized groups, always parallel
    Parallel,
    /// Per-stage choice by parallelism score
    #[default]
    Hybrid,
}

/// How a run ended; maps directly to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Complete,
    Failed,
    PlanningError,
    Cancelled,
}

impl TerminalStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminalStatus::Complete => 0,
            TerminalStatus::Failed => 1,
            TerminalStatus::PlanningError => 2,
            TerminalStatus::Cancelled => 130,
        }
    }
}

/// Remote control for a running orchestrator.
#[derive(Clone)]
pub struct PauseHandle {
    tx: watch::Sender<bool>,
}

impl PauseHandle {
    /// Block new dispatches; outstanding workers run to completion.
    pub fn pause(&self) {
        self.tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.tx.send_replace(false);
    }
}

/// The parallel orchestrator (one per process context; no globals).
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<StateStore>,
    resources: Arc<ResourceManager>,
    ctx: Arc<AgentContext>,
    pause_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, invoker: Arc<dyn LlmInvoker>) -> Self {
        let store = Arc::new(StateStore::new(config.projects_dir.clone()));
        let resources = Arc::new(ResourceManager::new(config.resource_limits.clone()));
        let ctx = Arc::new(AgentContext {
            invoker,
            registry: ProviderRegistry::new(config.providers.clone()),
            extractor: ArtifactExtractor::new(config.projects_dir.clone()),
            config: config.clone(),
        });
        let (pause_tx, _) = watch::channel(false);

        Self {
            config,
            store,
            resources,
            ctx,
            pause_tx,
        }
    }

    /// Production constructor wiring the real CLI invoker.
    pub fn with_cli_invoker(config: OrchestratorConfig) -> Self {
        let invoker = Arc::new(CliInvoker::new(Duration::from_secs(config.base_timeout_s)));
        Self::new(config, invoker)
    }

    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle {
            tx: self.pause_tx.clone(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Create a new project for `objective` and run it to a terminal
    /// status. Returns the project id with the outcome.
    pub async fn start(&self, objective: &str) -> Result<(String, TerminalStatus)> {
        let project = self
            .store
            .create(objective, self.config.clone())
            .await
            .context("Failed to create project")?;
        let project_id = project.project_id.clone();
        let status = self.run(&project_id).await?;
        Ok((project_id, status))
    }

    /// Run an existing project to a terminal status. Safe to call on a
    /// project that crashed mid-execution; in-flight work is demoted
    /// and re-planned.
    pub async fn run(&self, project_id: &str) -> Result<TerminalStatus> {
        let mut project = self
            .store
            .load(project_id)
            .await
            .with_context(|| format!("Failed to load project {}", project_id))?;

        match project.status {
            ProjectStatus::Complete => return Ok(TerminalStatus::Complete),
            ProjectStatus::Failed => return Ok(TerminalStatus::Failed),
            _ => {}
        }

        let sampler = Arc::clone(&self.resources).start_sampler();
        let result = self.run_inner(&mut project).await;
        sampler.abort();
        result
    }

    async fn run_inner(&self, project: &mut crate::state::Project) -> Result<TerminalStatus> {
        let project_id = project.project_id.clone();

        // Crash recovery: whatever was in flight was never acknowledged.
        let demoted = project.demote_in_progress();
        if !demoted.is_empty() {
            warn!(project_id = %project_id, count = demoted.len(), "demoted in-progress tasks");
            for task_id in demoted {
                let event = ProjectEvent::new(EventKind::TaskRetried)
                    .with_task(task_id)
                    .with_message("demoted after unclean shutdown");
                self.store.record(project, event).await?;
            }
            self.store.save(project).await?;
        }

        // State written by earlier runs may still carry queued tasks
        // whose dependencies are already failed for good.
        let blocked = project.block_unreachable_dependents();
        if !blocked.is_empty() {
            for task_id in blocked {
                let event = ProjectEvent::new(EventKind::TaskBlocked)
                    .with_task(task_id)
                    .with_error_kind("dependency_failed")
                    .with_message("unreachable after an earlier permanent failure");
                self.store.record(project, event).await?;
            }
            self.store.save(project).await?;
        }

        // A provider table that cannot execute is fatal before any task.
        if let Err(e) = self.ctx.registry.preflight() {
            error!(project_id = %project_id, "provider preflight failed: {}", e);
            let event = ProjectEvent::new(EventKind::ProjectFailed)
                .with_error_kind("configuration")
                .with_message(e.to_string());
            self.store.record(project, event).await?;
            project.set_status(ProjectStatus::Failed);
            self.store.save(project).await?;
            return Ok(TerminalStatus::Failed);
        }

        if project.status == ProjectStatus::Planning {
            if let Some(status) = self.plan_project(project).await? {
                return Ok(status);
            }
        }

        if project.status == ProjectStatus::Paused {
            let event = ProjectEvent::new(EventKind::ProjectResumed);
            self.store.record(project, event).await?;
            project.set_status(ProjectStatus::Executing);
            self.store.save(project).await?;
        }

        if project.tasks.is_empty() {
            // Nothing to execute; the project is trivially done.
            project.set_status(ProjectStatus::Complete);
            let event = ProjectEvent::new(EventKind::ProjectCompleted);
            self.store.record(project, event).await?;
            self.store.save(project).await?;
            return Ok(TerminalStatus::Complete);
        }

        let handle = ProjectHandle::new(project.clone(), Arc::clone(&self.store));
        self.execute_loop(&handle).await
    }

    /// Returns `Some(terminal)` when planning decided the run's fate.
    async fn plan_project(
        &self,
        project: &mut crate::state::Project,
    ) -> Result<Option<TerminalStatus>> {
        let manager = ProjectManager::new(Arc::clone(&self.ctx));
        match manager.plan(&project.objective, self.config.strategy).await {
            Ok(outcome) => {
                let kind = if outcome.fallback {
                    EventKind::PlanFallback
                } else {
                    EventKind::PlanAccepted
                };
                let event = ProjectEvent::new(kind)
                    .with_message(format!("{} tasks", outcome.tasks.len()));
                project.tasks = outcome.tasks;
                self.store.record(project, event).await?;
                project.set_status(ProjectStatus::Executing);
                self.store.save(project).await?;
                Ok(None)
            }
            Err(e) => {
                error!(project_id = %project.project_id, "planning failed: {}", e);
                let event = ProjectEvent::new(EventKind::ProjectFailed)
                    .with_error_kind("planning_error")
                    .with_message(e.to_string());
                self.store.record(project, event).await?;
                project.set_status(ProjectStatus::Failed);
                self.store.save(project).await?;
                Ok(Some(TerminalStatus::PlanningError))
            }
        }
    }

    async fn execute_loop(&self, handle: &ProjectHandle) -> Result<TerminalStatus> {
        let project_id = handle.project_id().await;
        let run_log = RunLog::open(&self.config, &project_id).await;
        run_log
            .line(&format!(
                "run start mode={:?} strategy={:?}",
                self.config.mode, self.config.strategy
            ))
            .await;

        // Consecutive admission denials per group key; reset the moment
        // the group gets through. Distinct from task attempt budgets.
        let mut starved_passes: HashMap<String, u32> = HashMap::new();

        loop {
            self.wait_if_paused(handle).await?;

            let snapshot = handle.snapshot().await;
            if !snapshot.any_task_queued() {
                break;
            }

            // The plan is rebuilt every pass; retries reshape it.
            let plan = match DependencyAnalyzer::analyze(&snapshot.tasks, self.config.strategy) {
                Ok(plan) => plan,
                Err(e) => {
                    error!(project_id = %project_id, "plan recompute failed: {}", e);
                    handle
                        .apply(StateUpdate::Event(
                            ProjectEvent::new(EventKind::ProjectFailed)
                                .with_error_kind("planning_error")
                                .with_message(e.to_string()),
                        ))
                        .await?;
                    handle.apply(StateUpdate::Status(ProjectStatus::Failed)).await?;
                    return Ok(TerminalStatus::Failed);
                }
            };

            let Some((stage_index, stage)) = plan
                .stages
                .iter()
                .enumerate()
                .find(|(_, stage)| {
                    stage
                        .task_ids()
                        .any(|id| snapshot.task(id).is_some_and(|t| t.is_queued()))
                })
            else {
                break;
            };

            let parallel = match self.config.mode {
                RunMode::Sequential => false,
                RunMode::Parallel => true,
                RunMode::Hybrid => plan.parallelism_score() >= PARALLELISM_THRESHOLD,
            };

            handle
                .apply(StateUpdate::Event(
                    ProjectEvent::new(EventKind::StageStarted)
                        .with_message(format!("stage {} parallel={}", stage_index, parallel)),
                ))
                .await?;

            let outcome = self
                .run_stage(handle, &project_id, stage_index, stage, parallel)
                .await?;

            handle
                .apply(StateUpdate::Event(
                    ProjectEvent::new(EventKind::StageCompleted).with_message(format!(
                        "stage {} success={} failed={} requeued={} denied={}",
                        stage_index,
                        outcome.success,
                        outcome.failed,
                        outcome.requeued,
                        outcome.denied_tasks
                    )),
                ))
                .await?;
            run_log
                .line(&format!(
                    "stage {} success={} failed={} requeued={} denied={}",
                    stage_index,
                    outcome.success,
                    outcome.failed,
                    outcome.requeued,
                    outcome.denied_tasks
                ))
                .await;

            // Admission deferrals never touch a task's attempt budget,
            // so they get their own bound: a group denied this many
            // passes in a row can never run under the configured limits.
            for key in &outcome.admitted_keys {
                starved_passes.remove(key);
            }
            for key in &outcome.denied_keys {
                let passes = starved_passes.entry(key.clone()).or_insert(0);
                *passes += 1;
                if *passes >= ADMISSION_STARVATION_LIMIT {
                    warn!(project_id = %project_id, key = %key, passes = *passes, "group starved of resources");
                    handle
                        .apply(StateUpdate::Event(
                            ProjectEvent::new(EventKind::ProjectFailed)
                                .with_error_kind("resource_starvation")
                                .with_message(format!(
                                    "group {} denied admission {} consecutive passes",
                                    key, passes
                                )),
                        ))
                        .await?;
                    handle
                        .apply(StateUpdate::Status(ProjectStatus::Failed))
                        .await?;
                    run_log.line("run failed: resource starvation").await;
                    return Ok(TerminalStatus::Failed);
                }
            }

            // A drained stage that moved nothing forward can never move
            // it forward later; requeued work and admission deferrals
            // still count as motion.
            if outcome.success == 0 && outcome.requeued == 0 && outcome.denied_tasks == 0 {
                let failed = handle.snapshot().await.failed_task_count();
                warn!(project_id = %project_id, stage_index, failed, "stage drained without progress");
                handle
                    .apply(StateUpdate::Event(
                        ProjectEvent::new(EventKind::ProjectFailed)
                            .with_error_kind("no_progress")
                            .with_message(format!(
                                "stage {} drained without progress; {} tasks permanently failed",
                                stage_index, failed
                            )),
                    ))
                    .await?;
                handle.apply(StateUpdate::Status(ProjectStatus::Failed)).await?;
                run_log.line("run failed: no progress").await;
                return Ok(TerminalStatus::Failed);
            }
        }

        let snapshot = handle.snapshot().await;
        if snapshot.all_tasks_complete() {
            handle
                .apply(StateUpdate::Event(ProjectEvent::new(
                    EventKind::ProjectCompleted,
                )))
                .await?;
            handle
                .apply(StateUpdate::Status(ProjectStatus::Complete))
                .await?;
            info!(project_id = %project_id, "project complete");
            run_log.line("run complete").await;
            Ok(TerminalStatus::Complete)
        } else {
            let failed = snapshot.failed_task_count();
            let blocked = snapshot.blocked_task_count();
            handle
                .apply(StateUpdate::Event(
                    ProjectEvent::new(EventKind::ProjectFailed).with_message(format!(
                        "{} tasks permanently failed, {} blocked",
                        failed, blocked
                    )),
                ))
                .await?;
            handle
                .apply(StateUpdate::Status(ProjectStatus::Failed))
                .await?;
            warn!(project_id = %project_id, failed, blocked, "project failed");
            run_log.line("run failed").await;
            Ok(TerminalStatus::Failed)
        }
    }

    /// Dispatch every group of one stage and merge their outcomes.
    async fn run_stage(
        &self,
        handle: &ProjectHandle,
        project_id: &str,
        stage_index: usize,
        stage: &Stage,
        parallel: bool,
    ) -> Result<StageOutcome> {
        let snapshot = handle.snapshot().await;
        let concurrency = self.resources.optimal_concurrency().await;

        let mut dispatches: Vec<(usize, crate::task::TaskGroup, Vec<TaskId>)> = Vec::new();
        for (group_index, group) in stage.groups.iter().enumerate() {
            let ready: Vec<TaskId> = group
                .task_ids
                .iter()
                .copied()
                .filter(|id| snapshot.is_task_ready(*id))
                .collect();
            if !ready.is_empty() {
                dispatches.push((group_index, group.clone(), ready));
            }
        }

        let mut total = StageOutcome::default();
        if parallel {
            let mut join_set = tokio::task::JoinSet::new();
            for (group_index, group, ready) in dispatches {
                let max_workers = ready
                    .len()
                    .min(self.config.strategy.max_group_size())
                    .min(concurrency.max(1));
                let key = format!("{}-s{}-g{}", project_id, stage_index, group_index);
                let handle = handle.clone();
                let ctx = Arc::clone(&self.ctx);
                let resources = Arc::clone(&self.resources);

                join_set.spawn(async move {
                    run_one_group(resources, ctx, handle, key, group, ready, max_workers).await
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(group_outcome) => total.absorb(group_outcome),
                    Err(e) => {
                        warn!("group task panicked: {}", e);
                    }
                }
            }
        } else {
            for (group_index, group, ready) in dispatches {
                let key = format!("{}-s{}-g{}", project_id, stage_index, group_index);
                let group_outcome = run_one_group(
                    Arc::clone(&self.resources),
                    Arc::clone(&self.ctx),
                    handle.clone(),
                    key,
                    group,
                    ready,
                    1,
                )
                .await;
                total.absorb(group_outcome);
            }
        }

        Ok(total)
    }

    /// Park between stages while paused; in-flight work is unaffected.
    async fn wait_if_paused(&self, handle: &ProjectHandle) -> Result<()> {
        let mut rx = self.pause_tx.subscribe();
        if !*rx.borrow() {
            return Ok(());
        }

        handle
            .apply(StateUpdate::Event(ProjectEvent::new(
                EventKind::ProjectPaused,
            )))
            .await?;
        handle
            .apply(StateUpdate::Status(ProjectStatus::Paused))
            .await?;
        info!("orchestrator paused");

        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }

        handle
            .apply(StateUpdate::Event(ProjectEvent::new(
                EventKind::ProjectResumed,
            )))
            .await?;
        handle
            .apply(StateUpdate::Status(ProjectStatus::Executing))
            .await?;
        info!("orchestrator resumed");
        Ok(())
    }
}

/// Merged outcomes of one stage pass. Admission denials are tracked
/// apart from worker requeues: a requeue spends a task attempt, a
/// denial spends nothing and needs its own escalation bound.
#[derive(Debug, Default)]
struct StageOutcome {
    success: usize,
    failed: usize,
    requeued: usize,
    denied_tasks: usize,
    admitted_keys: Vec<String>,
    denied_keys: Vec<String>,
}

impl StageOutcome {
    fn absorb(&mut self, group: GroupOutcome) {
        if group.admitted {
            self.success += group.summary.success;
            self.failed += group.summary.failed;
            self.requeued += group.summary.requeued;
            self.admitted_keys.push(group.key);
        } else {
            self.denied_tasks += group.task_count;
            self.denied_keys.push(group.key);
        }
    }
}

/// What happened to one group's dispatch attempt.
struct GroupOutcome {
    key: String,
    admitted: bool,
    task_count: usize,
    summary: GroupSummary,
}

/// Acquire admission for one group, run it through its lead, release.
async fn run_one_group(
    resources: Arc<ResourceManager>,
    ctx: Arc<AgentContext>,
    handle: ProjectHandle,
    key: String,
    group: crate::task::TaskGroup,
    ready: Vec<TaskId>,
    max_workers: usize,
) -> GroupOutcome {
    let request = ResourceRequest::for_agents(max_workers as u32, 1_000);

    let mut admitted = false;
    for _ in 0..ADMISSION_RETRIES {
        if resources.try_acquire(&key, request.clone()).await {
            admitted = true;
            break;
        }
        tokio::time::sleep(ADMISSION_RETRY_DELAY).await;
    }

    if !admitted {
        warn!(key = %key, "group admission denied, deferring to next pass");
        let _ = handle
            .apply(StateUpdate::Event(
                ProjectEvent::new(EventKind::ResourceDenied).with_message(key.clone()),
            ))
            .await;
        // Tasks stay queued; a later pass retries them under the
        // starvation bound.
        return GroupOutcome {
            key,
            admitted: false,
            task_count: ready.len(),
            summary: GroupSummary::default(),
        };
    }

    let lead = TeamLead::new(group.team, ctx);
    let summary = lead.run_group(&handle, &ready, max_workers).await;
    resources.release(&key).await;
    GroupOutcome {
        key,
        admitted: true,
        task_count: ready.len(),
        summary,
    }
}

/// Per-run log file under the project's `logs/` directory.
struct RunLog {
    path: Option<std::path::PathBuf>,
}

impl RunLog {
    async fn open(config: &OrchestratorConfig, project_id: &str) -> Self {
        let dir = env::logs_dir_path(&config.projects_dir, project_id);
        if tokio::fs::create_dir_all(&dir).await.is_err() {
            return Self { path: None };
        }
        let name = format!(
            "run-{}.log",
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        );
        Self {
            path: Some(dir.join(name)),
        }
    }

    async fn line(&self, text: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Ok(mut file) = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            let line = format!("{} {}\n", chrono::Utc::now().to_rfc3339(), text);
            let _ = file.write_all(line.as_bytes()).await;
        }
    }
}
