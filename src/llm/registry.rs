//! Provider registry: which CLI answers for which agent role.
//!
//! Roles are free-form strings (`"manager"`, `"frontend"`, `"qa"`, ...).
//! A role without an entry falls back to the `default` provider, and an
//! empty table falls back to a built-in `claude --print` spec so a bare
//! install still runs.

use crate::llm::types::ProviderSpec;
use std::collections::HashMap;
use tracing::debug;

/// Registry of LLM providers keyed by role.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderSpec>,
    fallback: ProviderSpec,
}

/// Errors raised by provider configuration checks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider for role '{role}' has an empty command vector")]
    EmptyCommand { role: String },
    #[error("provider command '{command}' (role '{role}') not found on PATH")]
    CommandNotFound { role: String, command: String },
}

impl ProviderRegistry {
    pub fn new(providers: HashMap<String, ProviderSpec>) -> Self {
        Self {
            providers,
            fallback: ProviderSpec::new(vec!["claude".to_string(), "--print".to_string()]),
        }
    }

    /// Look up the provider for `role`, falling back to `default`, then
    /// to the built-in spec.
    pub fn for_role(&self, role: &str) -> &ProviderSpec {
        self.providers
            .get(role)
            .or_else(|| self.providers.get("default"))
            .unwrap_or(&self.fallback)
    }

    /// Verify every configured provider resolves to a real executable.
    ///
    /// Run before any task executes so a bad provider table fails the
    /// project up front instead of mid-stage.
    pub fn preflight(&self) -> Result<(), ProviderError> {
        let configured = self.providers.iter();
        let fallback_entry = ("default (built-in)".to_string(), self.fallback.clone());

        let entries: Vec<(String, ProviderSpec)> = if self.providers.is_empty() {
            vec![fallback_entry]
        } else {
            configured.map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (role, spec) in entries {
            let program = spec.program().ok_or_else(|| ProviderError::EmptyCommand {
                role: role.clone(),
            })?;
            which::which(program).map_err(|_| ProviderError::CommandNotFound {
                role: role.clone(),
                command: program.to_string(),
            })?;
            debug!(%role, program, "provider preflight ok");
        }
        Ok(())
    }

    /// Extract the structured payload from provider output.
    ///
    /// When the spec declares `json_markers`, the portion between the
    /// first start marker and the next end marker is returned; otherwise
    /// (or when markers are absent from the output) the full text is
    /// treated as prose.
    pub fn extract_payload<'a>(spec: &ProviderSpec, stdout: &'a str) -> &'a str {
        if let Some((start, end)) = &spec.json_markers {
            if let Some(begin) = stdout.find(start.as_str()) {
                let after = &stdout[begin + start.len()..];
                if let Some(stop) = after.find(end.as_str()) {
                    return after[..stop].trim();
                }
            }
        }
        stdout.trim()
    }
}
