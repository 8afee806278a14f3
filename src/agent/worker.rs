//! Worker: execute exactly one ready task.
//!
//! A worker performs a single attempt. Transient failures put the task
//! back in the queue with its error context attached; the next
//! dispatch (by whichever lead picks it up) applies exponential backoff
//! with jitter and, after timeouts, a raised complexity score so the
//! adaptive timeout grows. QA-tagged work runs under a hard 180 s
//! ceiling and is never retried past it.

use crate::artifact::ArtifactExtractor;
use crate::config::OrchestratorConfig;
use crate::env;
use crate::llm::{ComplexityScore, InvokeError, LlmInvoker, ProviderRegistry};
use crate::state::{ProjectHandle, StateUpdate};
use crate::task::{Specialty, Task, TaskFailure, TaskId, Team};
use crate::agent::prompts;
use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Hard wall-clock ceiling for QA-tagged atomic tasks
const QA_ATOMIC_CEILING: Duration = Duration::from_secs(180);

/// Upstream summaries are clipped to this many characters
const UPSTREAM_SUMMARY_CHARS: usize = 200;

/// Services shared by every agent in one orchestrator context.
pub struct AgentContext {
    pub invoker: Arc<dyn LlmInvoker>,
    pub registry: ProviderRegistry,
    pub extractor: ArtifactExtractor,
    pub config: OrchestratorConfig,
}

impl AgentContext {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.config.base_timeout_s)
    }
}

/// How a single worker dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Transient failure, task re-queued under its retry budget
    Requeued,
    Failed,
}

/// One specialist agent bound to a specialty.
pub struct Worker {
    agent_id: String,
    specialty: Specialty,
    ctx: Arc<AgentContext>,
}

impl Worker {
    pub fn new(specialty: Specialty, ctx: Arc<AgentContext>) -> Self {
        let agent_id = format!(
            "worker-{}-{}",
            prompts::template_id(specialty),
            Uuid::new_v4().simple()
        );
        Self {
            agent_id,
            specialty,
            ctx,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Execute one ready task through one LLM invocation.
    pub async fn execute(&self, handle: &ProjectHandle, task_id: TaskId) -> Result<TaskOutcome> {
        let snapshot = handle.snapshot().await;
        let Some(task) = snapshot.task(task_id).cloned() else {
            anyhow::bail!("task {} not found in project", task_id);
        };
        if !snapshot.is_task_ready(task_id) {
            anyhow::bail!("task {} dispatched while not ready", task_id);
        }

        // Retry pacing happens before the attempt is visible in state.
        let prior_attempts = task.attempts;
        if prior_attempts > 0 {
            tokio::time::sleep(backoff_delay(prior_attempts)).await;
        }

        handle
            .apply(StateUpdate::TaskStarted {
                task_id,
                agent_id: self.agent_id.clone(),
            })
            .await?;

        let upstream = self.upstream_summaries(&snapshot.project_id, &task).await;
        let prompt = prompts::build_prompt(&task, &upstream);

        let mut complexity = ComplexityScore::from_prompt(&prompt);
        if task.error.as_ref().is_some_and(|e| e.kind == "timeout") {
            for _ in 0..prior_attempts {
                complexity = complexity.bumped();
            }
        }

        let qa_bound = self.specialty.is_qa() || task.team == Team::Qa;
        let provider = self.ctx.registry.for_role(task.team.as_str()).clone();
        let attempt = prior_attempts + 1;

        info!(
            %task_id,
            agent_id = %self.agent_id,
            attempt,
            complexity = complexity.value(),
            "worker attempt starting"
        );

        let invocation = self.ctx.invoker.invoke(&provider, &prompt, complexity);
        let result = if qa_bound {
            match tokio::time::timeout(QA_ATOMIC_CEILING, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    let failure = TaskFailure {
                        kind: "atomic_deadline_exceeded".to_string(),
                        message: format!(
                            "QA task exceeded the {}s atomic ceiling",
                            QA_ATOMIC_CEILING.as_secs()
                        ),
                        attempt,
                    };
                    warn!(%task_id, "qa atomic ceiling exceeded");
                    handle
                        .apply(StateUpdate::TaskFailed { task_id, failure })
                        .await?;
                    return Ok(TaskOutcome::Failed);
                }
            }
        } else {
            invocation.await
        };

        match result {
            Ok(output) => {
                let outcome = self
                    .ctx
                    .extractor
                    .extract(&snapshot.project_id, &task, &output.stdout)
                    .await
                    .context("artifact extraction failed")?;

                let tokens = estimate_tokens(&prompt) + estimate_tokens(&output.stdout);
                handle
                    .apply(StateUpdate::Usage {
                        agent_id: self.agent_id.clone(),
                        tokens,
                    })
                    .await?;
                handle
                    .apply(StateUpdate::TaskCompleted {
                        task_id,
                        result_ref: outcome.result_ref(),
                    })
                    .await?;

                info!(%task_id, deliverables = outcome.deliverables.len(), "task complete");
                Ok(TaskOutcome::Completed)
            }
            Err(error) => {
                self.handle_invoke_error(handle, task_id, attempt, error)
                    .await
            }
        }
    }

    async fn handle_invoke_error(
        &self,
        handle: &ProjectHandle,
        task_id: TaskId,
        attempt: u32,
        error: InvokeError,
    ) -> Result<TaskOutcome> {
        let kind = error.kind().to_string();
        let message = error.to_string();

        handle
            .apply(StateUpdate::Event(
                crate::state::ProjectEvent::new(crate::state::EventKind::TaskError)
                    .with_task(task_id)
                    .with_attempt(attempt)
                    .with_error_kind(kind.clone())
                    .with_message(message.clone()),
            ))
            .await?;

        if error.is_transient() && attempt < self.ctx.config.max_attempts {
            warn!(%task_id, attempt, %kind, "transient failure, requeueing");
            handle
                .apply(StateUpdate::TaskRequeued {
                    task_id,
                    error_kind: kind,
                    message,
                })
                .await?;
            return Ok(TaskOutcome::Requeued);
        }

        let final_kind = if error.is_transient() {
            "retries_exhausted".to_string()
        } else {
            kind
        };
        warn!(%task_id, attempt, kind = %final_kind, "task permanently failed");
        handle
            .apply(StateUpdate::TaskFailed {
                task_id,
                failure: TaskFailure {
                    kind: final_kind,
                    message,
                    attempt,
                },
            })
            .await?;
        Ok(TaskOutcome::Failed)
    }

    /// One-line summaries of the task's completed dependencies, read
    /// from their raw-output artifacts.
    async fn upstream_summaries(&self, project_id: &str, task: &Task) -> Vec<(String, String)> {
        let mut summaries = Vec::new();

        for dep_id in &task.depends_on {
            let dir = env::task_artifacts_dir_path(
                self.ctx.config.projects_dir.as_path(),
                project_id,
                &dep_id.to_string(),
            );
            let raw_path = dir.join("raw_output.txt");
            if let Ok(content) = tokio::fs::read_to_string(&raw_path).await {
                let summary: String = content.chars().take(UPSTREAM_SUMMARY_CHARS).collect();
                summaries.push((dep_id.to_string(), summary.replace('\n', " ")));
            }
        }
        summaries
    }
}

/// Exponential backoff with jitter: 500ms * 2^(attempts-1), +-25%,
/// capped at 30s.
pub(crate) fn backoff_delay(prior_attempts: u32) -> Duration {
    let exponent = prior_attempts.clamp(1, 6) - 1;
    let base_ms = 500u64 << exponent;
    let jitter = rand::rng().random_range(0.75..1.25);
    let ms = (base_ms as f64 * jitter).min(30_000.0);
    Duration::from_millis(ms as u64)
}

/// Rough chars/4 token estimate, enough for budget accounting.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::invoker::ScriptedInvoker;
    use crate::state::StateStore;
    use crate::task::{TaskSpec, TaskStatus};

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

    async fn project_with_task(
        projects_dir: &std::path::Path,
        team: Team,
    ) -> (ProjectHandle, TaskId) {
        let store = Arc::new(StateStore::new(projects_dir));
        let mut project = store
            .create("objective", OrchestratorConfig::default())
            .await
            .unwrap();
        let task = Task::new(TaskSpec {
            title: "do the thing".to_string(),
            description: "produce output".to_string(),
            team,
            specialty: Specialty::General,
            depends_on: Vec::new(),
        });
        let task_id = task.id;
        project.tasks.push(task);
        store.save(&mut project).await.unwrap();
        (ProjectHandle::new(project, store), task_id)
    }

    #[tokio::test]
    async fn test_successful_execution_completes_task() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(ScriptedInvoker::new().push_ok("all done"), dir.path());
        let (handle, task_id) = project_with_task(dir.path(), Team::General).await;

        let worker = Worker::new(Specialty::General, ctx);
        let outcome = worker.execute(&handle, task_id).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Completed);
        let snapshot = handle.snapshot().await;
        let task = snapshot.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.result_ref.is_some());
        assert_eq!(snapshot.usage.calls, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            ScriptedInvoker::new().push_err(InvokeError::Timeout {
                partial_stdout: String::new(),
                elapsed: Duration::from_secs(1),
            }),
            dir.path(),
        );
        let (handle, task_id) = project_with_task(dir.path(), Team::General).await;

        let worker = Worker::new(Specialty::General, ctx);
        let outcome = worker.execute(&handle, task_id).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Requeued);
        let snapshot = handle.snapshot().await;
        let task = snapshot.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.error.as_ref().unwrap().kind, "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhaustion_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let timeout = || InvokeError::Timeout {
            partial_stdout: String::new(),
            elapsed: Duration::from_secs(1),
        };
        let ctx = context(
            ScriptedInvoker::new()
                .push_err(timeout())
                .push_err(timeout())
                .push_err(timeout()),
            dir.path(),
        );
        let (handle, task_id) = project_with_task(dir.path(), Team::General).await;

        for _ in 0..2 {
            let worker = Worker::new(Specialty::General, Arc::clone(&ctx));
            assert_eq!(
                worker.execute(&handle, task_id).await.unwrap(),
                TaskOutcome::Requeued
            );
        }

        let worker = Worker::new(Specialty::General, ctx);
        let outcome = worker.execute(&handle, task_id).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Failed);

        let snapshot = handle.snapshot().await;
        let task = snapshot.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.error.as_ref().unwrap().kind, "retries_exhausted");
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            ScriptedInvoker::new().push_err(InvokeError::NotFound {
                command: "claude".to_string(),
            }),
            dir.path(),
        );
        let (handle, task_id) = project_with_task(dir.path(), Team::General).await;

        let worker = Worker::new(Specialty::General, ctx);
        let outcome = worker.execute(&handle, task_id).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Failed);
        let snapshot = handle.snapshot().await;
        assert_eq!(
            snapshot.task(task_id).unwrap().error.as_ref().unwrap().kind,
            "cli_not_found"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_qa_ceiling_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            ScriptedInvoker::new()
                .with_call_delay(Duration::from_secs(600))
                .push_ok("too late"),
            dir.path(),
        );
        let (handle, task_id) = project_with_task(dir.path(), Team::Qa).await;

        let worker = Worker::new(Specialty::QaHtml, ctx);
        let outcome = worker.execute(&handle, task_id).await.unwrap();

        assert_eq!(outcome, TaskOutcome::Failed);
        let snapshot = handle.snapshot().await;
        let task = snapshot.task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_ref().unwrap().kind,
            "atomic_deadline_exceeded"
        );
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        let third = backoff_delay(3);
        assert!(first >= Duration::from_millis(375));
        assert!(first <= Duration::from_millis(625));
        assert!(third > first);
        assert!(backoff_delay(20) <= Duration::from_secs(30));
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
