//! Crash-safe project state.
//!
//! One JSON file per project, written atomically, backed up on every
//! replacement, with an append-only event log alongside it.

pub mod events;
pub mod handle;
pub mod store;
pub mod types;

pub use events::EventLog;
pub use handle::{ProjectHandle, StateUpdate};
pub use store::{StateError, StateStore};
pub use types::{
    AgentUsage, EventKind, Project, ProjectEvent, ProjectStatus, UsageTotals,
};
