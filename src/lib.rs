//! # Multi-Agent Orchestrator
//!
//! A Rust-based orchestrator that coordinates a hierarchy of external
//! LLM command-line tools to plan and execute a natural-language
//! project objective end-to-end, producing deliverable files. Project
//! state is kept crash-safe on disk and every run is resumable.
//!
//! ## Architecture Overview
//!
//! The system consists of several key components organized into modules:
//!
//! - **[`llm`]**: CLI invocation layer with ASCII sanitization, adaptive
//!   timeouts, and the provider registry
//! - **[`task`]**: Task data model and the dependency analyzer that
//!   stages tasks into parallel-safe groups
//! - **[`state`]**: Atomic, versioned project persistence with backups,
//!   restore, and an append-only event log
//! - **[`artifact`]**: Extraction of named deliverable files from
//!   free-form LLM output
//! - **[`agent`]**: The delegation hierarchy: project manager planning,
//!   team leads fanning out, workers executing atomic tasks
//! - **[`resource`]**: Admission control over token/memory/CPU/agent
//!   budgets with live host sampling
//! - **[`orchestrator`]**: Stage-by-stage execution with sequential,
//!   parallel, and hybrid modes, pause/resume, and crash recovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mao::{Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let orchestrator = Orchestrator::with_cli_invoker(config);
//!
//!     let (project_id, status) = orchestrator
//!         .start("Build a responsive landing page with a contact form")
//!         .await?;
//!
//!     println!("{} finished: {:?}", project_id, status);
//!     Ok(())
//! }
//! ```

/// On-disk layout constants and path helpers.
pub mod env;

/// Orchestrator configuration with strict unknown-key rejection.
pub mod config;

/// LLM CLI invocation: sanitization, subprocess control, providers.
pub mod llm;

/// Task model and dependency analysis.
pub mod task;

/// Crash-safe project state store and event log.
pub mod state;

/// Artifact extraction from raw LLM output.
pub mod artifact;

/// Manager / lead / worker delegation hierarchy.
pub mod agent;

/// Resource admission control and host monitoring.
pub mod resource;

/// Stage-by-stage project execution.
pub mod orchestrator;

/// Command-line interface for headless runs.
pub mod cli;

// Re-export the main entry types
pub use config::{OrchestratorConfig, ResourceLimits};
pub use orchestrator::{Orchestrator, PauseHandle, RunMode, TerminalStatus};

// Re-export the core task and plan types
pub use task::{
    DependencyAnalyzer, ExecutionPlan, GroupingStrategy, Specialty, Task, TaskId, TaskSpec,
    TaskStatus, Team,
};

// Re-export state types
pub use state::{Project, ProjectHandle, ProjectStatus, StateStore};

// Re-export the invocation seam
pub use llm::{CliInvoker, ComplexityScore, InvokeError, InvokeOutput, LlmInvoker, ProviderSpec};

// Re-export resource types
pub use resource::{ResourceManager, ResourceRequest};

// Re-export artifact types
pub use artifact::{ArtifactExtractor, ArtifactKind, ArtifactMeta};
