//! Command execution bridge.
//!
//! Runs exactly one external process per call with a hard timeout. Arguments
//! always travel as a discrete argv and payloads through stdin; nothing is
//! ever spliced into a shell string.

use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A single external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on `PATH`)
    pub program: String,
    /// Arguments, passed verbatim
    pub args: Vec<String>,
    /// Bytes written to the child's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,
    /// Hard limit on the child's run time
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(content.into());
        self
    }
}

/// Outcome of a finished (or timed out) command.
///
/// A non-zero exit is an ordinary value here; callers decide what it means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code; `None` if the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    /// Whether the timeout fired before the process exited
    pub timed_out: bool,
}

impl CommandResult {
    /// Create a successful result with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
        }
    }

    /// Create a failed result with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            timed_out: false,
        }
    }

    /// Create a timed out result.
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }

    /// Whether the command exited with status 0.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout as text, lossily decoded.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Short description of a failure, for error messages.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.timed_out, self.exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) if stderr.is_empty() => format!("exit code {code}"),
            (false, Some(code)) => format!("exit code {code}: {stderr}"),
            (false, None) if stderr.is_empty() => "terminated by signal".to_string(),
            (false, None) => format!("terminated by signal: {stderr}"),
        }
    }
}

/// Something that can run a [`CommandSpec`].
///
/// Errors are reserved for environment failures (binary missing, spawn
/// failure); a command that runs and fails is an `Ok` result.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> SandboxResult<CommandResult>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec) -> SandboxResult<CommandResult> {
        debug!(program = %spec.program, args = ?spec.args, "Running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout must not leave it running.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::runtime_unavailable(format!("'{}' not found: {e}", spec.program))
            } else {
                SandboxError::Io(e)
            }
        })?;

        let writer = match (child.stdin.take(), spec.stdin) {
            (Some(mut stdin), Some(content)) => Some(tokio::spawn(async move {
                let result = stdin.write_all(&content).await;
                drop(stdin);
                result
            })),
            _ => None,
        };

        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(program = %spec.program, timeout = ?spec.timeout, "Command timed out");
                return Ok(CommandResult::timeout());
            }
        };

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The child may exit without draining stdin; its exit status
                // is what callers judge.
                Ok(Err(e)) => debug!(error = %e, "stdin write did not complete"),
                Err(e) => debug!(error = %e, "stdin writer task failed"),
            }
        }

        let result = CommandResult {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            timed_out: false,
        };
        debug!(
            program = %spec.program,
            exit_code = ?result.exit_code,
            "Command finished"
        );
        Ok(result)
    }
}
