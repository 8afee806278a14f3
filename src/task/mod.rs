//! Task data model and dependency analysis.

pub mod graph;
pub mod types;

pub use graph::{DependencyAnalyzer, ExecutionPlan, GraphError, GroupingStrategy, Stage, TaskGroup};
pub use types::{Specialty, Task, TaskFailure, TaskId, TaskSpec, TaskStatus, Team};
