//! Project manager: objective in, validated task list out.
//!
//! Planning runs once per project, before any execution stage, through
//! the same invocation machinery workers use (sanitization, adaptive
//! timeout, retries). The manager asks for a JSON array of tasks with
//! index-based dependencies, resolves indices to task ids, tags teams
//! and specialties, and hands the list to the dependency analyzer for
//! validation. A plan that cannot be parsed at all degrades to a single
//! general task wrapping the whole objective; a parsed plan with graph
//! errors aborts the project.

use crate::agent::prompts;
use crate::agent::worker;
use crate::llm::{ComplexityScore, InvokeError, ProviderRegistry};
use crate::task::{
    DependencyAnalyzer, GraphError, GroupingStrategy, Specialty, Task, TaskSpec, Team,
};
use crate::agent::worker::AgentContext;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Fatal planning failures; both abort the project as `planning_error`.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("planning invocation failed: {0}")]
    Invoke(#[from] InvokeError),
    #[error("invalid plan: {0}")]
    Graph(#[from] GraphError),
}

/// The accepted plan, flagged when it is the degraded fallback.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub tasks: Vec<Task>,
    pub fallback: bool,
}

/// One task as the planning LLM describes it.
#[derive(Debug, Deserialize)]
struct PlannedTask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    depends_on: Vec<serde_json::Value>,
}

/// The project manager agent.
pub struct ProjectManager {
    ctx: Arc<AgentContext>,
}

impl ProjectManager {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Produce the task list for `objective`.
    pub async fn plan(
        &self,
        objective: &str,
        strategy: GroupingStrategy,
    ) -> Result<PlanOutcome, PlanningError> {
        let provider = self.ctx.registry.for_role("manager").clone();
        let prompt = prompts::planning_prompt(objective, provider.json_markers.as_ref());
        let complexity = ComplexityScore::from_prompt(&prompt).bumped();

        let mut last_error: Option<InvokeError> = None;
        let mut stdout = None;
        for attempt in 1..=self.ctx.config.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(worker::backoff_delay(attempt - 1)).await;
            }
            match self.ctx.invoker.invoke(&provider, &prompt, complexity).await {
                Ok(output) => {
                    stdout = Some(output.stdout);
                    break;
                }
                Err(e) if e.is_transient() && attempt < self.ctx.config.max_attempts => {
                    warn!(attempt, kind = e.kind(), "planning attempt failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(PlanningError::Invoke(e)),
            }
        }
        let stdout = match stdout {
            Some(s) => s,
            None => {
                return Err(PlanningError::Invoke(last_error.unwrap_or(
                    InvokeError::Failed {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: "planning produced no output".to_string(),
                    },
                )));
            }
        };

        let payload = ProviderRegistry::extract_payload(&provider, &stdout);
        match parse_plan(payload) {
            Some(tasks) if !tasks.is_empty() => {
                // Graph errors in a parsed plan are fatal.
                DependencyAnalyzer::analyze(&tasks, strategy)?;
                info!(tasks = tasks.len(), "plan accepted");
                Ok(PlanOutcome {
                    tasks,
                    fallback: false,
                })
            }
            _ => {
                warn!("plan output unparseable, degrading to single-task fallback");
                Ok(PlanOutcome {
                    tasks: vec![fallback_task(objective)],
                    fallback: true,
                })
            }
        }
    }
}

/// Parse the payload into tasks, resolving index-based dependencies.
/// Returns `None` when the payload is not a usable plan.
fn parse_plan(payload: &str) -> Option<Vec<Task>> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map.get("tasks")?.as_array()?.clone(),
        _ => return None,
    };

    let planned: Vec<PlannedTask> = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()
        .ok()?;

    // First pass creates tasks so ids exist for index resolution.
    let mut tasks: Vec<Task> = planned
        .iter()
        .map(|p| {
            let team = Team::parse(&p.team);
            let text = format!("{} {}", p.title, p.description);
            Task::new(TaskSpec {
                title: p.title.clone(),
                description: p.description.clone(),
                team,
                specialty: prompts::specialty_for(team, &text),
                depends_on: Vec::new(),
            })
        })
        .collect();

    for (i, p) in planned.iter().enumerate() {
        let mut deps = Vec::new();
        for raw in &p.depends_on {
            let index = coerce_index(raw)?;
            if index >= tasks.len() || index == i {
                return None;
            }
            deps.push(tasks[index].id);
        }
        tasks[i].depends_on = deps;
    }

    Some(tasks)
}

fn coerce_index(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|v| v as usize),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn fallback_task(objective: &str) -> Task {
    Task::new(TaskSpec {
        title: "Complete the objective".to_string(),
        description: objective.to_string(),
        team: Team::General,
        specialty: Specialty::General,
        depends_on: Vec::new(),
    })
}
