//! Docker/Podman command-line runtime.
//!
//! Both CLIs accept the same verbs and flags for everything used here, so a
//! single implementation drives either binary. Outcomes are classified from
//! the exit status and stderr:
//!
//! - "no such container"-style answers become `Absent` / `AlreadyAbsent`
//! - "cannot connect to the daemon" becomes `RuntimeUnavailable`
//! - anything else non-zero is an error for the caller to surface

use super::{ContainerRuntime, CreateSpec, ExecOptions, RuntimeState, StepOutcome};
use crate::{
    config::SandboxRuntimeType,
    error::{SandboxError, SandboxResult},
    exec::{CommandResult, CommandRunner, CommandSpec},
    naming::SandboxName,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NOT_FOUND_SIGNATURES: &[&str] = &[
    "no such container",
    "no such object",
    "no container with name or id",
];

const UNREACHABLE_SIGNATURES: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "cannot connect to podman",
    "error during connect",
];

const CONFLICT_SIGNATURES: &[&str] = &["is already in use"];

/// Seconds a container gets to shut down before it is killed.
const STOP_GRACE_SECS: &str = "10";

/// Container runtime driven through the `docker` or `podman` CLI.
pub struct CliRuntime {
    runtime_type: SandboxRuntimeType,
    binary: String,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl CliRuntime {
    /// Create a CLI runtime.
    ///
    /// `runtime_type` must be concrete (`Docker` or `Podman`).
    pub fn new(
        runtime_type: SandboxRuntimeType,
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
    ) -> SandboxResult<Self> {
        let binary = runtime_type.binary().ok_or_else(|| {
            SandboxError::Config("runtime must be resolved before use".to_string())
        })?;

        Ok(Self {
            runtime_type,
            binary: binary.to_string(),
            runner,
            timeout,
        })
    }

    async fn cli(&self, args: Vec<String>, timeout: Duration) -> SandboxResult<CommandResult> {
        debug!(binary = %self.binary, args = ?args, "Running runtime command");
        let spec = CommandSpec::new(&self.binary, timeout).args(args);
        self.runner.run(spec).await
    }

    /// Turn a failed CLI result into an error, checking for an unreachable
    /// runtime first.
    fn failure(&self, operation: &str, result: &CommandResult, timeout: Duration) -> SandboxError {
        if result.timed_out {
            return SandboxError::io_timeout(operation, timeout);
        }
        if matches_any(&result.stderr, UNREACHABLE_SIGNATURES) {
            return SandboxError::runtime_unavailable(result.stderr.trim().to_string());
        }
        SandboxError::io_failure(operation, result.failure_message())
    }

    fn step(
        &self,
        operation: &str,
        result: CommandResult,
        timeout: Duration,
    ) -> SandboxResult<StepOutcome> {
        if result.is_success() {
            Ok(StepOutcome::Applied)
        } else if !result.timed_out && matches_any(&result.stderr, NOT_FOUND_SIGNATURES) {
            Ok(StepOutcome::AlreadyAbsent)
        } else {
            Err(self.failure(operation, &result, timeout))
        }
    }

    fn run_args(spec: &CreateSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.to_string(),
        ];

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push("-w".to_string());
        args.push(spec.workdir.clone());

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    fn exec_args(name: &SandboxName, argv: &[String], options: &ExecOptions) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if options.stdin.is_some() {
            args.push("-i".to_string());
        }
        if let Some(user) = &options.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        if let Some(workdir) = &options.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }
        args.push(name.to_string());
        args.extend(argv.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn runtime_type(&self) -> SandboxRuntimeType {
        self.runtime_type
    }

    async fn inspect(&self, name: &SandboxName) -> SandboxResult<RuntimeState> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            name.to_string(),
        ];
        let result = self.cli(args, self.timeout).await?;

        if result.is_success() {
            return match result.stdout_text().trim() {
                "true" => Ok(RuntimeState::Running),
                "false" => Ok(RuntimeState::Stopped),
                other => Err(SandboxError::io_failure(
                    "inspect",
                    format!("unexpected state output '{other}'"),
                )),
            };
        }

        if !result.timed_out && matches_any(&result.stderr, NOT_FOUND_SIGNATURES) {
            return Ok(RuntimeState::Absent);
        }

        Err(self.failure("inspect", &result, self.timeout))
    }

    async fn create(&self, spec: &CreateSpec) -> SandboxResult<bool> {
        let result = self.cli(Self::run_args(spec), spec.timeout).await?;

        if result.is_success() {
            return Ok(true);
        }
        if !result.timed_out && matches_any(&result.stderr, CONFLICT_SIGNATURES) {
            debug!(name = %spec.name, "Sandbox name already taken");
            return Ok(false);
        }
        if result.timed_out || matches_any(&result.stderr, UNREACHABLE_SIGNATURES) {
            return Err(self.failure("create", &result, spec.timeout));
        }

        Err(SandboxError::provisioning_failed(
            spec.name.as_str(),
            result.failure_message(),
        ))
    }

    async fn start(&self, name: &SandboxName) -> SandboxResult<StepOutcome> {
        let result = self
            .cli(vec!["start".to_string(), name.to_string()], self.timeout)
            .await?;
        self.step("start", result, self.timeout)
    }

    async fn stop(&self, name: &SandboxName) -> SandboxResult<StepOutcome> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            STOP_GRACE_SECS.to_string(),
            name.to_string(),
        ];
        let result = self.cli(args, self.timeout).await?;
        self.step("stop", result, self.timeout)
    }

    async fn remove(&self, name: &SandboxName, force: bool) -> SandboxResult<StepOutcome> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());

        let result = self.cli(args, self.timeout).await?;
        self.step("remove", result, self.timeout)
    }

    async fn exec(
        &self,
        name: &SandboxName,
        argv: &[String],
        options: ExecOptions,
    ) -> SandboxResult<CommandResult> {
        let args = Self::exec_args(name, argv, &options);
        debug!(binary = %self.binary, args = ?args, "Executing in sandbox");

        let mut spec = CommandSpec::new(&self.binary, options.timeout).args(args);
        spec.stdin = options.stdin;
        let result = self.runner.run(spec).await?;

        if !result.is_success() && matches_any(&result.stderr, UNREACHABLE_SIGNATURES) {
            return Err(SandboxError::runtime_unavailable(
                result.stderr.trim().to_string(),
            ));
        }
        Ok(result)
    }
}

fn matches_any(stderr: &str, signatures: &[&str]) -> bool {
    let stderr = stderr.to_lowercase();
    signatures.iter().any(|s| stderr.contains(s))
}
