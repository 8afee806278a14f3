//! Single-shot CLI invocation with bounded wall-clock time.
//!
//! The invoker spawns the provider's command with an explicit argument
//! vector (never through a shell), writes the sanitized prompt to stdin,
//! closes it, and reads stdout/stderr to completion under a deadline
//! scaled by the caller's complexity score. On deadline expiry the
//! subprocess gets a termination signal, a short grace period, then a
//! hard kill; partial stdout is reported with the timeout.
//!
//! Retry policy is caller-owned. One call, one subprocess.

use crate::llm::sanitize;
use crate::llm::types::{ComplexityScore, InvokeError, InvokeOutput, ProviderSpec};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Seam between agents and the outside world. The production
/// implementation shells out to real CLIs; tests substitute a scripted
/// one.
#[async_trait::async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn invoke(
        &self,
        provider: &ProviderSpec,
        prompt: &str,
        complexity: ComplexityScore,
    ) -> Result<InvokeOutput, InvokeError>;
}

/// Invoker backed by real subprocesses.
#[derive(Debug, Clone)]
pub struct CliInvoker {
    base_timeout: Duration,
    grace: Duration,
}

impl CliInvoker {
    pub fn new(base_timeout: Duration) -> Self {
        Self {
            base_timeout,
            grace: Duration::from_secs(2),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Send a termination signal, wait out the grace period, then kill.
    async fn reap(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill timed-out subprocess: {}", e);
                }
            }
        }
    }
}

async fn drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match handle {
        Some(h) => h.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

#[async_trait::async_trait]
impl LlmInvoker for CliInvoker {
    async fn invoke(
        &self,
        provider: &ProviderSpec,
        prompt: &str,
        complexity: ComplexityScore,
    ) -> Result<InvokeOutput, InvokeError> {
        let program = provider.program().ok_or_else(|| InvokeError::NotFound {
            command: String::new(),
        })?;

        // Resolve up front so a missing binary is a configuration error,
        // not a spawn failure halfway through a stage.
        which::which(program).map_err(|_| InvokeError::NotFound {
            command: program.to_string(),
        })?;

        let clean_prompt = sanitize::sanitize(prompt);
        let deadline = complexity.scale_timeout(self.base_timeout);

        debug!(
            program,
            complexity = complexity.value(),
            timeout_s = deadline.as_secs(),
            "invoking CLI"
        );

        let mut child = Command::new(program)
            .args(provider.argv())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => InvokeError::NotFound {
                    command: program.to_string(),
                },
                _ => InvokeError::Failed {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("spawn failed: {}", e),
                },
            })?;

        let start = Instant::now();

        // Readers drain both pipes from the start so a chatty child can
        // never fill a pipe while we are still feeding it the prompt.
        let stdout_reader = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                buf
            })
        });

        if let Some(mut stdin) = child.stdin.take() {
            // A subprocess that exits without reading its stdin produces
            // a broken pipe here; that is its answer, not our error.
            let _ = stdin.write_all(clean_prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }

        let status = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(InvokeError::Failed {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("wait failed: {}", e),
                });
            }
            Err(_) => {
                self.reap(&mut child).await;
                let partial = drain(stdout_reader).await;
                let partial_stdout = sanitize::sanitize(&String::from_utf8_lossy(&partial));
                return Err(InvokeError::Timeout {
                    partial_stdout,
                    elapsed: start.elapsed(),
                });
            }
        };

        let elapsed = start.elapsed();
        let stdout_bytes = drain(stdout_reader).await;
        let stderr_bytes = drain(stderr_reader).await;

        let stdout_text = String::from_utf8(stdout_bytes).map_err(|e| InvokeError::Encoding {
            detail: format!("stdout is not valid UTF-8: {}", e),
        })?;
        let stdout = sanitize::sanitize(&stdout_text);
        let exit_code = status.code().unwrap_or(-1);

        if status.success() {
            Ok(InvokeOutput {
                stdout,
                exit_code,
                elapsed,
            })
        } else {
            Err(InvokeError::Failed {
                exit_code,
                stdout,
                stderr: sanitize::sanitize(&String::from_utf8_lossy(&stderr_bytes)),
            })
        }
    }
}

/// Scripted invoker for tests: pops pre-loaded results in order, and
/// echoes the sanitized prompt back once the script is exhausted.
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<String, InvokeError>>>,
    call_delay: Duration,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            call_delay: Duration::ZERO,
        }
    }

    /// Make every call take at least `delay` of wall-clock time.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn push_ok(self, stdout: impl Into<String>) -> Self {
        self.script
            .try_lock()
            .expect("script configured before use")
            .push_back(Ok(stdout.into()));
        self
    }

    pub fn push_err(self, err: InvokeError) -> Self {
        self.script
            .try_lock()
            .expect("script configured before use")
            .push_back(Err(err));
        self
    }
}

impl Default for ScriptedInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _provider: &ProviderSpec,
        prompt: &str,
        _complexity: ComplexityScore,
    ) -> Result<InvokeOutput, InvokeError> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let next = self.script.lock().await.pop_front();
        match next {
            Some(Ok(stdout)) => Ok(InvokeOutput {
                stdout,
                exit_code: 0,
                elapsed: self.call_delay,
            }),
            Some(Err(e)) => Err(e),
            None => Ok(InvokeOutput {
                stdout: sanitize::sanitize(prompt),
                exit_code: 0,
                elapsed: self.call_delay,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_provider() -> ProviderSpec {
        ProviderSpec::new(vec!["cat".to_string()])
    }

    #[tokio::test]
    async fn test_invoke_echoes_stdin() {
        let invoker = CliInvoker::new(Duration::from_secs(10));
        let out = invoker
            .invoke(&cat_provider(), "hello from stdin", ComplexityScore::MIN)
            .await
            .unwrap();

        assert_eq!(out.stdout, "hello from stdin");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_invoke_sanitizes_both_directions() {
        let invoker = CliInvoker::new(Duration::from_secs(10));
        let out = invoker
            .invoke(&cat_provider(), "a \u{2192} b", ComplexityScore::MIN)
            .await
            .unwrap();

        // The arrow was replaced before it ever reached the subprocess.
        assert_eq!(out.stdout, "a -> b");
    }

    #[tokio::test]
    async fn test_invoke_missing_binary() {
        let invoker = CliInvoker::new(Duration::from_secs(5));
        let provider = ProviderSpec::new(vec!["definitely-not-a-real-cli-tool".to_string()]);
        let err = invoker
            .invoke(&provider, "hi", ComplexityScore::MIN)
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::NotFound { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invoke_timeout_kills_subprocess() {
        let invoker =
            CliInvoker::new(Duration::from_millis(200)).with_grace(Duration::from_millis(100));
        let provider = ProviderSpec::new(vec!["sleep".to_string(), "30".to_string()]);

        let start = Instant::now();
        let err = invoker
            .invoke(&provider, "", ComplexityScore::MIN)
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Timeout { .. }));
        // Well under the 30s the subprocess wanted.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_invoke_nonzero_exit() {
        let invoker = CliInvoker::new(Duration::from_secs(5));
        let provider = ProviderSpec::new(vec!["false".to_string()]);
        let err = invoker
            .invoke(&provider, "", ComplexityScore::MIN)
            .await
            .unwrap_err();

        match err {
            InvokeError::Failed { exit_code, .. } => assert_ne!(exit_code, 0),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_invoker_pops_in_order() {
        let invoker = ScriptedInvoker::new()
            .push_ok("first")
            .push_err(InvokeError::Timeout {
                partial_stdout: String::new(),
                elapsed: Duration::from_secs(1),
            });
        let provider = cat_provider();

        let first = invoker
            .invoke(&provider, "p", ComplexityScore::MIN)
            .await
            .unwrap();
        assert_eq!(first.stdout, "first");

        let second = invoker.invoke(&provider, "p", ComplexityScore::MIN).await;
        assert!(matches!(second, Err(InvokeError::Timeout { .. })));

        // Exhausted script echoes the prompt.
        let third = invoker
            .invoke(&provider, "echo me", ComplexityScore::MIN)
            .await
            .unwrap();
        assert_eq!(third.stdout, "echo me");
    }
}
