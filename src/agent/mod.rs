//! Hierarchical delegation: manager plans, leads fan out, workers execute.

pub mod lead;
pub mod planner;
pub mod prompts;
pub mod worker;

pub use lead::{GroupSummary, TeamLead};
pub use planner::{PlanningError, ProjectManager};
pub use worker::{AgentContext, TaskOutcome, Worker};
