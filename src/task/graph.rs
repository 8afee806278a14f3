//! Dependency analysis: task list in, staged execution plan out.
//!
//! Tasks form a directed graph with an edge `d -> t` for every
//! `d in t.depends_on`. The analyzer rejects cycles and unknown
//! references, computes longest-path depth per node, and partitions
//! equal-depth nodes into team-homogeneous groups bounded by the
//! strategy's group size. Stages are emitted in ascending depth, so all
//! of a task's dependencies always live in strictly earlier stages.

use crate::task::types::{Task, TaskId, Team};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Grouping presets for the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupingStrategy {
    /// Small groups, one team per stage
    Conservative,
    /// Medium groups, teams share stages
    #[default]
    Balanced,
    /// Large groups, teams share stages
    Aggressive,
}

impl GroupingStrategy {
    pub fn max_group_size(&self) -> usize {
        match self {
            GroupingStrategy::Conservative => 2,
            GroupingStrategy::Balanced => 4,
            GroupingStrategy::Aggressive => 8,
        }
    }

    /// Conservative keeps each stage to a single team; the others let
    /// one stage carry groups from several teams.
    pub fn single_team_stages(&self) -> bool {
        matches!(self, GroupingStrategy::Conservative)
    }
}

/// A set of tasks sharing a team, executable concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskGroup {
    pub team: Team,
    pub task_ids: Vec<TaskId>,
}

/// One dependency level of the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub groups: Vec<TaskGroup>,
}

impl Stage {
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|g| g.task_ids.len()).sum()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.groups.iter().flat_map(|g| g.task_ids.iter().copied())
    }
}

/// Ordered stages over the full task set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
    pub strategy: GroupingStrategy,
}

impl ExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.stages.iter().map(Stage::task_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Ratio of tasks to stages; >= 1.5 recommends parallel execution.
    pub fn parallelism_score(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        self.task_count() as f64 / self.stages.len() as f64
    }
}

/// Plan construction failures; both abort the project before any worker
/// runs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle detected among tasks: {involved:?}")]
    CycleDetected { involved: Vec<TaskId> },
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },
}

/// Stateless analyzer; all inputs arrive per call.
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Build the staged plan for `tasks` under `strategy`.
    pub fn analyze(tasks: &[Task], strategy: GroupingStrategy) -> Result<ExecutionPlan, GraphError> {
        if tasks.is_empty() {
            return Ok(ExecutionPlan {
                stages: Vec::new(),
                strategy,
            });
        }

        let index: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        // Reject unknown references before any graph math.
        for task in tasks {
            for dep in &task.depends_on {
                if !index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.id,
                        dependency: *dep,
                    });
                }
            }
        }

        let depths = Self::longest_path_depths(tasks, &index)?;

        // Bucket by depth, preserving input order within a bucket.
        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut by_depth: Vec<Vec<&Task>> = vec![Vec::new(); max_depth + 1];
        for task in tasks {
            by_depth[depths[&task.id]].push(task);
        }

        let mut stages = Vec::new();
        for level in by_depth {
            if level.is_empty() {
                continue;
            }

            // Partition the level by team, then chunk to group size.
            let mut by_team: Vec<(Team, Vec<TaskId>)> = Vec::new();
            for task in level {
                match by_team.iter_mut().find(|(team, _)| *team == task.team) {
                    Some((_, ids)) => ids.push(task.id),
                    None => by_team.push((task.team, vec![task.id])),
                }
            }
            by_team.sort_by_key(|(team, _)| *team);

            if strategy.single_team_stages() {
                for (team, ids) in by_team {
                    stages.push(Stage {
                        groups: Self::chunk(team, ids, strategy.max_group_size()),
                    });
                }
            } else {
                let mut groups = Vec::new();
                for (team, ids) in by_team {
                    groups.extend(Self::chunk(team, ids, strategy.max_group_size()));
                }
                stages.push(Stage { groups });
            }
        }

        let plan = ExecutionPlan { stages, strategy };
        debug!(
            tasks = plan.task_count(),
            stages = plan.stages.len(),
            score = plan.parallelism_score(),
            "execution plan built"
        );
        Ok(plan)
    }

    /// Kahn's algorithm, tracking longest-path depth per node. Leftover
    /// nodes after the queue drains are exactly the cycle participants.
    fn longest_path_depths(
        tasks: &[Task],
        index: &HashMap<TaskId, &Task>,
    ) -> Result<HashMap<TaskId, usize>, GraphError> {
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut indegree: HashMap<TaskId, usize> = HashMap::new();

        for task in tasks {
            indegree.insert(task.id, task.depends_on.len());
            for dep in &task.depends_on {
                dependents.entry(*dep).or_default().push(task.id);
            }
        }

        let mut queue: VecDeque<TaskId> = tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id)
            .collect();

        let mut depths: HashMap<TaskId, usize> = queue.iter().map(|id| (*id, 0)).collect();

        while let Some(id) = queue.pop_front() {
            let depth = depths[&id];
            if let Some(children) = dependents.get(&id) {
                for child in children {
                    let entry = depths.entry(*child).or_insert(0);
                    *entry = (*entry).max(depth + 1);

                    let remaining = indegree.get_mut(child).expect("child is indexed");
                    *remaining -= 1;
                    if *remaining == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }

        if depths.len() < index.len() {
            let mut involved: Vec<TaskId> = index
                .keys()
                .filter(|id| indegree[*id] > 0)
                .copied()
                .collect();
            involved.sort();
            return Err(GraphError::CycleDetected { involved });
        }

        Ok(depths)
    }

    fn chunk(team: Team, ids: Vec<TaskId>, max_group_size: usize) -> Vec<TaskGroup> {
        ids.chunks(max_group_size.max(1))
            .map(|chunk| TaskGroup {
                team,
                task_ids: chunk.to_vec(),
            })
            .collect()
    }
}
