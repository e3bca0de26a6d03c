//! Container runtime boundary.
//!
//! The lifecycle manager only ever talks to a [`ContainerRuntime`]:
//!
//! - `cli`: Docker/Podman command-line implementation over a
//!   [`CommandRunner`](crate::exec::CommandRunner)

pub mod cli;

use crate::config::SandboxRuntimeType;
use crate::exec::{CommandResult, CommandRunner, CommandSpec};
use crate::naming::SandboxName;
use crate::SandboxResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

pub use cli::CliRuntime;

/// Observed state of a sandbox in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    /// No container with this name exists
    Absent,
    /// Container exists but is not running
    Stopped,
    /// Container is running
    Running,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Everything needed to create a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: SandboxName,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Working directory of the container's main process
    pub workdir: String,
    /// Foreground command keeping the container alive
    pub command: Vec<String>,
    pub timeout: Duration,
}

/// Options for a command executed inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl ExecOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn stdin(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(content.into());
        self
    }
}

/// Result of a start, stop or remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The runtime performed the step
    Applied,
    /// The runtime reported that the sandbox does not exist
    AlreadyAbsent,
}

/// The operations the lifecycle manager needs from a container runtime.
///
/// Implementations must report "no such container" as
/// [`RuntimeState::Absent`] / [`StepOutcome::AlreadyAbsent`] and reserve
/// errors for a broken or unreachable runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime flavour, for logging.
    fn runtime_type(&self) -> SandboxRuntimeType;

    /// Query whether the sandbox exists and is running.
    async fn inspect(&self, name: &SandboxName) -> SandboxResult<RuntimeState>;

    /// Create and start a new sandbox.
    ///
    /// A name conflict (another caller created it first) is reported as
    /// `Ok(false)`; `Ok(true)` means this call created it.
    async fn create(&self, spec: &CreateSpec) -> SandboxResult<bool>;

    /// Start an existing, stopped sandbox.
    async fn start(&self, name: &SandboxName) -> SandboxResult<StepOutcome>;

    /// Stop a sandbox.
    async fn stop(&self, name: &SandboxName) -> SandboxResult<StepOutcome>;

    /// Remove a sandbox.
    async fn remove(&self, name: &SandboxName, force: bool) -> SandboxResult<StepOutcome>;

    /// Execute an argv inside a running sandbox.
    async fn exec(
        &self,
        name: &SandboxName,
        argv: &[String],
        options: ExecOptions,
    ) -> SandboxResult<CommandResult>;
}

/// Upper bound for one `<runtime> info` check during detection.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Detect available container runtimes.
///
/// Checks for Docker, then Podman. Each check is bounded by `timeout`; a
/// runtime whose daemon does not answer in time counts as unavailable.
pub async fn detect_runtime(
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> Option<SandboxRuntimeType> {
    for runtime in [SandboxRuntimeType::Docker, SandboxRuntimeType::Podman] {
        if let Some(binary) = runtime.binary() {
            if is_available(runner, binary, timeout).await {
                info!(runtime = ?runtime, "Detected container runtime");
                return Some(runtime);
            }
        }
    }

    warn!("No container runtime detected");
    None
}

/// Resolve `Auto` to a concrete runtime.
pub async fn resolve_runtime(
    configured: SandboxRuntimeType,
    runner: &dyn CommandRunner,
    timeout: Duration,
) -> SandboxResult<SandboxRuntimeType> {
    match configured {
        SandboxRuntimeType::Auto => detect_runtime(runner, timeout).await.ok_or_else(|| {
            crate::SandboxError::runtime_unavailable("neither docker nor podman is available")
        }),
        other => Ok(other),
    }
}

async fn is_available(runner: &dyn CommandRunner, binary: &str, timeout: Duration) -> bool {
    match runner.run(CommandSpec::new(binary, timeout).arg("info")).await {
        Ok(result) if result.timed_out => {
            warn!(binary, timeout = ?timeout, "Runtime check timed out");
            false
        }
        Ok(result) => result.is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_state_display() {
        assert_eq!(RuntimeState::Absent.to_string(), "absent");
        assert_eq!(RuntimeState::Running.to_string(), "running");
    }

    #[test]
    fn test_runtime_state_serialize() {
        let json = serde_json::to_string(&RuntimeState::Stopped).unwrap();
        assert_eq!(json, r#""stopped""#);
    }

    #[test]
    fn test_exec_options_builder() {
        let opts = ExecOptions::new(Duration::from_secs(2))
            .user(Some("dev".to_string()))
            .workdir("/workspace")
            .stdin("x");
        assert_eq!(opts.user.as_deref(), Some("dev"));
        assert_eq!(opts.workdir.as_deref(), Some("/workspace"));
        assert_eq!(opts.stdin.as_deref(), Some(&b"x"[..]));
    }

    /// Answers `info` per binary; records what it was asked.
    struct InfoRunner {
        docker: CommandResult,
        podman: CommandResult,
        seen: std::sync::Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl CommandRunner for InfoRunner {
        async fn run(&self, spec: CommandSpec) -> SandboxResult<CommandResult> {
            self.seen.lock().unwrap().push(spec.clone());
            Ok(match spec.program.as_str() {
                "docker" => self.docker.clone(),
                _ => self.podman.clone(),
            })
        }
    }

    fn info_runner(docker: CommandResult, podman: CommandResult) -> InfoRunner {
        InfoRunner {
            docker,
            podman,
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_resolve_explicit_runtime() {
        let runner = info_runner(CommandResult::timeout(), CommandResult::timeout());
        let runtime = resolve_runtime(SandboxRuntimeType::Podman, &runner, DETECT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(runtime, SandboxRuntimeType::Podman);
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detect_skips_hung_docker() {
        let runner = info_runner(CommandResult::timeout(), CommandResult::success(""));
        let timeout = Duration::from_millis(250);

        let runtime = resolve_runtime(SandboxRuntimeType::Auto, &runner, timeout)
            .await
            .unwrap();

        assert_eq!(runtime, SandboxRuntimeType::Podman);
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|spec| spec.timeout == timeout));
        assert_eq!(seen[0].args, vec!["info"]);
    }

    #[tokio::test]
    async fn test_detect_nothing_available() {
        let runner = info_runner(
            CommandResult::failure(1, "Cannot connect to the Docker daemon"),
            CommandResult::timeout(),
        );

        let err = resolve_runtime(SandboxRuntimeType::Auto, &runner, DETECT_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, crate::SandboxError::RuntimeUnavailable(_)));
    }

    /// A daemon that never answers is given up on after the timeout.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_info_check_is_bounded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("docker");
        std::fs::write(&stub, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let available = is_available(
            &crate::exec::ProcessRunner,
            stub.to_str().unwrap(),
            Duration::from_millis(200),
        )
        .await;

        assert!(!available);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
