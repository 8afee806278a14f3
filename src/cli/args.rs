//! Command line argument parsing.
//!
//! Two subcommands cover the headless lifecycle:
//! - `run`: plan and execute a new objective
//! - `resume`: continue an existing project after a crash or pause

use crate::config::OrchestratorConfig;
use crate::orchestrator::RunMode;
use crate::task::GroupingStrategy;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeCliOption {
    Sequential,
    Parallel,
    Hybrid,
}

impl ModeCliOption {
    pub fn into_run_mode(self) -> RunMode {
        match self {
            ModeCliOption::Sequential => RunMode::Sequential,
            ModeCliOption::Parallel => RunMode::Parallel,
            ModeCliOption::Hybrid => RunMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyCliOption {
    Conservative,
    Balanced,
    Aggressive,
}

impl StrategyCliOption {
    pub fn into_strategy(self) -> GroupingStrategy {
        match self {
            StrategyCliOption::Conservative => GroupingStrategy::Conservative,
            StrategyCliOption::Balanced => GroupingStrategy::Balanced,
            StrategyCliOption::Aggressive => GroupingStrategy::Aggressive,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mao")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Multi-agent orchestrator: plans and executes project objectives through external LLM CLI tools"
)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file (TOML); unrecognized keys are rejected
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the projects directory
    #[arg(long, global = true)]
    pub projects_dir: Option<PathBuf>,

    /// Override the execution mode
    #[arg(long, value_enum, global = true)]
    pub mode: Option<ModeCliOption>,

    /// Override the grouping strategy
    #[arg(long, value_enum, global = true)]
    pub strategy: Option<StrategyCliOption>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan and execute a new project objective
    Run {
        /// The natural-language objective
        objective: String,
    },
    /// Resume an existing project
    Resume {
        /// Project id under the projects directory
        project_id: String,
    },
}

impl Args {
    /// Resolve the effective configuration from file and flag overrides.
    pub fn resolve_config(&self) -> Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::from_toml_file(path)?,
            None => OrchestratorConfig::default(),
        };

        if let Some(dir) = &self.projects_dir {
            config.projects_dir = dir.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into_run_mode();
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into_strategy();
        }
        Ok(config)
    }
}
