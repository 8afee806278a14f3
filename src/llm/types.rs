use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Description of one LLM CLI provider: the command vector to execute,
/// extra arguments appended after it, and optional start/end markers
/// around a structured JSON payload embedded in free-form output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    /// Command vector; `cmd[0]` is the executable
    pub cmd: Vec<String>,
    /// Arguments appended after `cmd`
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Optional `[start, end]` tokens delimiting an embedded JSON payload
    #[serde(default)]
    pub json_markers: Option<(String, String)>,
}

impl ProviderSpec {
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            extra_args: Vec::new(),
            json_markers: None,
        }
    }

    /// The executable name, if the command vector is non-empty.
    pub fn program(&self) -> Option<&str> {
        self.cmd.first().map(String::as_str)
    }

    /// Full argument vector after the executable: `cmd[1..]` then `extra_args`.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        self.cmd
            .iter()
            .skip(1)
            .chain(self.extra_args.iter())
            .map(String::as_str)
    }
}

/// Successful result of one CLI invocation.
#[derive(Debug, Clone)]
pub struct InvokeOutput {
    /// Sanitized stdout of the subprocess
    pub stdout: String,
    /// Exit code reported by the subprocess
    pub exit_code: i32,
    /// Wall-clock duration of the invocation
    pub elapsed: Duration,
}

/// Failure modes of one CLI invocation. Retry is the caller's business;
/// the invoker is a single-shot primitive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("CLI timed out after {elapsed:?}")]
    Timeout {
        /// Whatever stdout had produced before the deadline
        partial_stdout: String,
        elapsed: Duration,
    },
    #[error("CLI command not found: {command}")]
    NotFound { command: String },
    #[error("CLI exited with status {exit_code}")]
    Failed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("output is not decodable text: {detail}")]
    Encoding { detail: String },
}

impl InvokeError {
    /// Transient failures may be retried under the caller's budget;
    /// a missing binary or undecodable output never recovers by retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            InvokeError::Timeout { .. } => true,
            InvokeError::Failed { stdout, .. } => stdout.trim().is_empty(),
            InvokeError::NotFound { .. } | InvokeError::Encoding { .. } => false,
        }
    }

    /// Short machine-readable tag used in event records.
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::Timeout { .. } => "timeout",
            InvokeError::NotFound { .. } => "cli_not_found",
            InvokeError::Failed { .. } => "cli_failed",
            InvokeError::Encoding { .. } => "encoding_error",
        }
    }
}

/// Complexity score in `[1..10]` controlling the adaptive timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComplexityScore(u8);

/// Keywords whose presence marks a prompt as analysis/testing work.
const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analysis", "test", "verify", "validate", "audit", "review", "benchmark",
];

impl ComplexityScore {
    pub const MIN: ComplexityScore = ComplexityScore(1);
    pub const MAX: ComplexityScore = ComplexityScore(10);

    /// Construct a score, clamping into `[1..10]`.
    pub fn new(score: u8) -> Self {
        Self(score.clamp(1, 10))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Raise the score one step, saturating at 10. Used by callers that
    /// want the next attempt's timeout to grow after a timeout.
    pub fn bumped(&self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    /// Derive a score from prompt length and analysis keywords.
    ///
    /// Length contributes 1 point per 2000 characters (up to 7); each
    /// analysis keyword found adds one more, saturating at 10.
    pub fn from_prompt(prompt: &str) -> Self {
        let length_points = (prompt.len() / 2000).min(6) as u8 + 1;

        let lowered = prompt.to_lowercase();
        let keyword_points = ANALYSIS_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(**kw))
            .count()
            .min(3) as u8;

        Self::new(length_points + keyword_points)
    }

    /// Scale a base timeout by this score.
    ///
    /// Piecewise linear and monotonic: 1.0x at score 1, 1.5x at 5,
    /// 2.25x at 8, 3.0x at 10. Never exceeds 3x the base.
    pub fn scale_timeout(&self, base: Duration) -> Duration {
        let s = self.0 as f64;
        let factor = if s <= 5.0 {
            1.0 + (s - 1.0) * (0.5 / 4.0)
        } else if s <= 8.0 {
            1.5 + (s - 5.0) * (0.75 / 3.0)
        } else {
            2.25 + (s - 8.0) * (0.75 / 2.0)
        };
        base.mul_f64(factor.min(3.0))
    }
}

impl Default for ComplexityScore {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_clamping() {
        assert_eq!(ComplexityScore::new(0).value(), 1);
        assert_eq!(ComplexityScore::new(7).value(), 7);
        assert_eq!(ComplexityScore::new(200).value(), 10);
        assert_eq!(ComplexityScore::MAX.bumped().value(), 10);
    }

    #[test]
    fn test_score_from_prompt() {
        let short = ComplexityScore::from_prompt("say hi");
        assert_eq!(short.value(), 1);

        let long = ComplexityScore::from_prompt(&"x".repeat(9000));
        assert!(long.value() > short.value());

        let analysis = ComplexityScore::from_prompt("analyze and test the output");
        assert!(analysis.value() > short.value());
    }

    #[test]
    fn test_timeout_scaling_monotonic_and_capped() {
        let base = Duration::from_secs(100);

        let mut previous = Duration::ZERO;
        for score in 1..=10u8 {
            let scaled = ComplexityScore::new(score).scale_timeout(base);
            assert!(scaled >= previous, "score {} regressed", score);
            assert!(scaled <= base * 3);
            previous = scaled;
        }

        assert_eq!(ComplexityScore::new(1).scale_timeout(base), base);
        assert_eq!(ComplexityScore::new(10).scale_timeout(base), base * 3);
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            InvokeError::Timeout {
                partial_stdout: String::new(),
                elapsed: Duration::from_secs(1),
            }
            .is_transient()
        );

        assert!(
            InvokeError::Failed {
                exit_code: 1,
                stdout: String::new(),
                stderr: "boom".to_string(),
            }
            .is_transient()
        );

        // A failure that still produced output is not worth retrying blind.
        assert!(
            !InvokeError::Failed {
                exit_code: 1,
                stdout: "partial answer".to_string(),
                stderr: String::new(),
            }
            .is_transient()
        );

        assert!(
            !InvokeError::NotFound {
                command: "claude".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_provider_argv_order() {
        let spec = ProviderSpec {
            cmd: vec!["claude".into(), "--print".into()],
            extra_args: vec!["--model".into(), "sonnet".into()],
            json_markers: None,
        };
        assert_eq!(spec.program(), Some("claude"));
        let argv: Vec<&str> = spec.argv().collect();
        assert_eq!(argv, vec!["--print", "--model", "sonnet"]);
    }
}
