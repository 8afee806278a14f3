//! Orchestrator configuration.
//!
//! The recognized option set mirrors what an outer driver may pass in:
//! retry budget, base timeout, grouping strategy, run mode, resource
//! limits, projects directory, and the provider table. Unrecognized keys
//! are rejected at deserialization time so a typo in a config file fails
//! loudly instead of silently running with defaults.

use crate::llm::ProviderSpec;
use crate::orchestrator::RunMode;
use crate::task::GroupingStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OrchestratorConfig {
    /// Per-task retry budget
    pub max_attempts: u32,
    /// Base wall-clock timeout for a single CLI invocation, in seconds
    pub base_timeout_s: u64,
    /// Task grouping strategy for the dependency analyzer
    pub strategy: GroupingStrategy,
    /// Execution mode for the orchestrator
    pub mode: RunMode,
    /// Admission-control limits
    pub resource_limits: ResourceLimits,
    /// Directory under which per-project state lives
    pub projects_dir: PathBuf,
    /// Provider table: role name to command description
    pub providers: HashMap<String, ProviderSpec>,
}

/// Limits for the four admission dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ResourceLimits {
    /// Tokens admitted per sliding minute
    pub tokens_per_min: u64,
    /// Instantaneous memory budget in MB
    pub memory_mb: u64,
    /// Instantaneous CPU budget in percent
    pub cpu_pct: f64,
    /// Live concurrent agent ceiling
    pub concurrent_agents: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_timeout_s: 120,
            strategy: GroupingStrategy::Balanced,
            mode: RunMode::Hybrid,
            resource_limits: ResourceLimits::default(),
            projects_dir: PathBuf::from(crate::env::DEFAULT_PROJECTS_DIR_NAME),
            providers: HashMap::new(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            tokens_per_min: 100_000,
            memory_mb: 4096,
            cpu_pct: 80.0,
            concurrent_agents: 4,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, rejecting unknown keys.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Look up the provider for a role, falling back to the `default` role.
    pub fn provider_for(&self, role: &str) -> Option<&ProviderSpec> {
        self.providers
            .get(role)
            .or_else(|| self.providers.get("default"))
    }
}
