//! External command execution for the provisioning engine.
//!
//! Every interaction with the PKI toolchain and the service manager goes
//! through the [`CommandRunner`] trait so the engine can be driven by a
//! deterministic fake in tests. The production implementation executes
//! commands with a bounded timeout; none of the external tools we call
//! are allowed to block a request indefinitely.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::debug;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors surfaced by external command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not be spawned at all
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not finish within the allowed time
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The command ran but exited non-zero
    #[error("command `{command}` failed with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Result alias for command execution.
pub type CommandResult<T> = Result<T, CommandError>;

/// Capability interface for running external commands.
///
/// Returns trimmed stdout on success; a non-zero exit is an error carrying
/// the captured stderr.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> CommandResult<String>;
}

/// Production [`CommandRunner`] backed by `tokio::process`.
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner with the default per-command timeout.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Create a runner with a custom per-command timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn render_command(command: &str, args: &[&str]) -> String {
    let mut rendered = String::from(command);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        command: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> CommandResult<String> {
        let rendered = render_command(command, args);
        debug!(cmd = command, ?args, "running external command");

        let mut invocation = TokioCommand::new(command);
        invocation.args(args);
        if let Some(dir) = cwd {
            invocation.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, invocation.output()).await {
            Ok(result) => result.map_err(|source| CommandError::Spawn {
                command: rendered.clone(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::Timeout {
                    command: rendered,
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(CommandError::Failed {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_and_trims_stdout() {
        let runner = SystemRunner::new();
        let out = runner.run("echo", &["hello"], None).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let runner = SystemRunner::new();
        let err = runner
            .run("funchovpn-no-such-binary", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let runner = SystemRunner::new();
        let err = runner
            .run("sh", &["-c", "echo boom >&2; exit 3"], None)
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn respects_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::new();
        let out = runner.run("pwd", &[], Some(dir.path())).await.unwrap();
        assert_eq!(std::path::PathBuf::from(out), dir.path().canonicalize().unwrap());
    }
}
