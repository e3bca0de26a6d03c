//! Sandbox lifecycle management.
//!
//! The [`LifecycleManager`] owns every decision about whether a sandbox
//! must be created, started, scaffolded or removed. Nothing is cached
//! locally: each call re-derives the sandbox state from the runtime, so a
//! container stopped or deleted out-of-band is repaired on the next
//! `ensure_ready`.

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::exec::ProcessRunner;
use crate::files::argv;
use crate::locks::{IdentityLocks, SharedGuard};
use crate::naming::{name_for, SandboxName};
use crate::path::WorkspacePath;
use crate::runtime::{
    resolve_runtime, CliRuntime, ContainerRuntime, CreateSpec, ExecOptions, RuntimeState,
    StepOutcome, DETECT_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label set on every container created by this crate.
pub const MANAGED_LABEL: &str = "keybox.managed";

/// A mutating step taken while making a sandbox ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Created,
    Started,
    Scaffolded,
}

/// Outcome of [`LifecycleManager::ensure_ready`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyReport {
    /// True only when the sandbox is running and its workspace is scaffolded
    pub ready: bool,
    pub name: SandboxName,
    /// Human-readable summary
    pub detail: String,
    /// Mutating steps this call performed, in order
    pub actions: Vec<LifecycleAction>,
}

/// Outcome of [`LifecycleManager::teardown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Whether the sandbox was verified absent afterwards
    pub deleted: bool,
    pub name: SandboxName,
}

/// Read-only snapshot of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatusReport {
    pub name: SandboxName,
    pub state: RuntimeState,
    /// Scaffold marker present (only checked while running)
    pub workspace_ready: bool,
    /// Last ensure failure seen by this process, cleared on success
    pub last_error: Option<String>,
}

/// Result of waiting for a sandbox to reach the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Confirmed,
    /// Attempts exhausted; carries the last observed state
    TimedOut(RuntimeState),
}

/// Bounded poll with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            attempts: config.poll_attempts.max(1),
            interval: Duration::from_millis(config.poll_interval_ms),
            max_interval: Duration::from_millis(config.poll_max_interval_ms),
        }
    }

    /// Delay before check `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.interval.saturating_mul(factor).min(self.max_interval)
    }
}

enum BringUp {
    Running,
    NotRunning(String),
}

/// Manages sandbox lifecycles, one sandbox per identity.
///
/// Cheap to clone; clones share the runtime and the lock table.
///
/// # Example
///
/// ```rust,no_run
/// use keybox_sandbox::{LifecycleManager, SandboxConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = LifecycleManager::from_config(SandboxConfig::default()).await?;
///
///     let report = manager.ensure_ready("GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H").await?;
///     println!("{} ready: {}", report.name, report.ready);
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SandboxConfig,
    runtime: Arc<dyn ContainerRuntime>,
    locks: IdentityLocks,
    workspace: WorkspacePath,
    last_errors: Mutex<HashMap<SandboxName, String>>,
}

impl LifecycleManager {
    /// Create a manager over an existing runtime.
    pub fn new(config: SandboxConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let workspace = WorkspacePath::new(config.workspace_root.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                locks: IdentityLocks::new(),
                workspace,
                last_errors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a manager driving the configured runtime's CLI.
    ///
    /// Resolves `runtime = auto` by probing for Docker, then Podman.
    pub async fn from_config(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        let runtime_type = resolve_runtime(
            config.runtime,
            &ProcessRunner,
            config.command_timeout().min(DETECT_TIMEOUT),
        )
        .await?;
        let runtime = CliRuntime::new(
            runtime_type,
            Arc::new(ProcessRunner),
            config.command_timeout(),
        )?;

        info!(
            runtime = ?runtime_type,
            image = %config.image,
            "Lifecycle manager initialized"
        );
        Ok(Self::new(config, Arc::new(runtime)))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.inner.runtime
    }

    pub fn workspace(&self) -> &WorkspacePath {
        &self.inner.workspace
    }

    /// Derive the sandbox name for an identity.
    pub fn name_for(&self, identity: &str) -> SandboxResult<SandboxName> {
        name_for(&self.inner.config.name_prefix, identity)
    }

    /// Resolve a session reference to a sandbox name.
    ///
    /// References carrying the configured name prefix are taken as runtime
    /// names; anything else is an identity.
    pub fn resolve_ref(&self, sandbox_ref: &str) -> SandboxResult<SandboxName> {
        let sandbox_ref = sandbox_ref.trim();
        let prefix = format!("{}-", self.inner.config.name_prefix);
        if sandbox_ref.starts_with(&prefix) && sandbox_ref.len() > prefix.len() {
            Ok(SandboxName::from_runtime(sandbox_ref))
        } else {
            self.name_for(sandbox_ref)
        }
    }

    /// Bring the identity's sandbox to running with a scaffolded workspace.
    ///
    /// Idempotent: a sandbox that is already running and scaffolded is
    /// reported ready without any mutating runtime call. If the sandbox does
    /// not reach running within the bounded wait the report says
    /// `ready: false` and the caller may retry later.
    pub async fn ensure_ready(&self, identity: &str) -> SandboxResult<ReadyReport> {
        let name = self.name_for(identity)?;
        let inner = Arc::clone(&self.inner);

        // The task owns the guard: dropping the caller's future must not
        // release the lock while a runtime command is in flight.
        let task = tokio::spawn(async move {
            let _guard = inner.locks.exclusive(&name).await;
            let result = inner.ensure_ready_locked(&name).await;
            inner.record_outcome(&name, &result);
            result
        });

        task.await
            .map_err(|e| SandboxError::io_failure("ensure_ready", format!("task failed: {e}")))?
    }

    /// Whether the identity's sandbox is running.
    ///
    /// A single state query; takes no lock and repairs nothing.
    pub async fn health_check(&self, identity: &str) -> SandboxResult<bool> {
        let name = self.name_for(identity)?;
        self.is_running(&name).await
    }

    /// Guard for operations that need a running sandbox.
    pub async fn require_ready(&self, identity: &str) -> SandboxResult<SandboxName> {
        let name = self.name_for(identity)?;
        self.require_ready_name(&name).await?;
        Ok(name)
    }

    /// [`require_ready`](Self::require_ready) for an already derived name.
    pub async fn require_ready_name(&self, name: &SandboxName) -> SandboxResult<()> {
        if self.is_running(name).await? {
            Ok(())
        } else {
            Err(SandboxError::NotRunning(name.to_string()))
        }
    }

    /// Stop and remove the identity's sandbox.
    ///
    /// Each step is attempted independently and "not found" counts as
    /// success. `deleted` is the verified post-condition.
    pub async fn teardown(&self, identity: &str) -> SandboxResult<TeardownReport> {
        let name = self.name_for(identity)?;
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _guard = inner.locks.exclusive(&name).await;
            inner.teardown_locked(&name).await
        });

        task.await
            .map_err(|e| SandboxError::io_failure("teardown", format!("task failed: {e}")))?
    }

    /// Read-only snapshot of the identity's sandbox.
    pub async fn status(&self, identity: &str) -> SandboxResult<SandboxStatusReport> {
        let name = self.name_for(identity)?;
        let state = self.inner.runtime.inspect(&name).await?;
        let workspace_ready = if state == RuntimeState::Running {
            self.inner.marker_present(&name).await?
        } else {
            false
        };

        Ok(SandboxStatusReport {
            last_error: self.inner.last_error(&name),
            name,
            state,
            workspace_ready,
        })
    }

    /// Take the sandbox's lock in shared mode.
    pub async fn lock_shared(&self, name: &SandboxName) -> SharedGuard {
        self.inner.locks.shared(name).await
    }

    /// Exec options for a workspace command.
    pub fn exec_options(&self, timeout: Duration) -> ExecOptions {
        self.inner.exec_options(timeout)
    }

    async fn is_running(&self, name: &SandboxName) -> SandboxResult<bool> {
        let state = self.inner.runtime.inspect(name).await?;
        debug!(name = %name, state = %state, "Health check");
        Ok(state == RuntimeState::Running)
    }
}

impl Inner {
    async fn ensure_ready_locked(&self, name: &SandboxName) -> SandboxResult<ReadyReport> {
        let mut actions = Vec::new();
        let state = self.runtime.inspect(name).await?;
        info!(name = %name, state = %state, "Ensuring sandbox is ready");

        if let BringUp::NotRunning(detail) = self.bring_up(name, state, &mut actions).await? {
            warn!(name = %name, detail = %detail, "Sandbox did not reach running state");
            return Ok(ReadyReport {
                ready: false,
                name: name.clone(),
                detail,
                actions,
            });
        }

        if !self.marker_present(name).await? {
            self.scaffold(name).await?;
            actions.push(LifecycleAction::Scaffolded);
        }

        let detail = if actions.is_empty() {
            "sandbox already running".to_string()
        } else {
            format!("sandbox ready after {}", describe(&actions))
        };
        info!(name = %name, actions = ?actions, "Sandbox ready");

        Ok(ReadyReport {
            ready: true,
            name: name.clone(),
            detail,
            actions,
        })
    }

    /// Drive the sandbox towards running.
    ///
    /// Create is attempted at most once; start up to `start_attempts` times.
    async fn bring_up(
        &self,
        name: &SandboxName,
        mut state: RuntimeState,
        actions: &mut Vec<LifecycleAction>,
    ) -> SandboxResult<BringUp> {
        let mut create_attempted = false;
        let mut starts = 0;
        let mut last_start_error: Option<SandboxError> = None;

        loop {
            match state {
                RuntimeState::Running => return Ok(BringUp::Running),
                RuntimeState::Absent if create_attempted => {
                    return Ok(BringUp::NotRunning(
                        "sandbox disappeared after create".to_string(),
                    ));
                }
                RuntimeState::Absent => {
                    create_attempted = true;
                    info!(name = %name, image = %self.config.image, "Creating sandbox");
                    if self.runtime.create(&self.create_spec(name)).await? {
                        actions.push(LifecycleAction::Created);
                    } else {
                        info!(name = %name, "Sandbox created concurrently, continuing");
                    }
                }
                RuntimeState::Stopped if starts >= self.config.start_attempts => {
                    let detail = match last_start_error {
                        Some(e) => format!("sandbox not running after {starts} start attempts: {e}"),
                        None => format!("sandbox not running after {starts} start attempts"),
                    };
                    return Ok(BringUp::NotRunning(detail));
                }
                RuntimeState::Stopped => {
                    starts += 1;
                    info!(name = %name, attempt = starts, "Starting sandbox");
                    match self.runtime.start(name).await {
                        Ok(StepOutcome::Applied) => {
                            if !actions.contains(&LifecycleAction::Started) {
                                actions.push(LifecycleAction::Started);
                            }
                        }
                        Ok(StepOutcome::AlreadyAbsent) => {
                            debug!(name = %name, "Sandbox vanished before start");
                            state = RuntimeState::Absent;
                            continue;
                        }
                        Err(e @ SandboxError::RuntimeUnavailable(_)) => return Err(e),
                        Err(e) => {
                            warn!(name = %name, error = %e, "Start failed");
                            last_start_error = Some(e);
                        }
                    }
                }
            }

            state = match self.wait_for_running(name).await? {
                WaitOutcome::Confirmed => RuntimeState::Running,
                WaitOutcome::TimedOut(last) => last,
            };
        }
    }

    async fn wait_for_running(&self, name: &SandboxName) -> SandboxResult<WaitOutcome> {
        let policy = PollPolicy::from_config(&self.config);
        let mut last = RuntimeState::Absent;

        for attempt in 0..policy.attempts {
            last = self.runtime.inspect(name).await?;
            if last == RuntimeState::Running {
                return Ok(WaitOutcome::Confirmed);
            }
            if attempt + 1 < policy.attempts {
                let delay = policy.delay(attempt);
                debug!(name = %name, state = %last, delay = ?delay, "Waiting for sandbox");
                tokio::time::sleep(delay).await;
            }
        }

        Ok(WaitOutcome::TimedOut(last))
    }

    async fn marker_present(&self, name: &SandboxName) -> SandboxResult<bool> {
        let marker = self.config.marker_path();
        let timeout = self.config.command_timeout();
        let result = self
            .runtime
            .exec(
                name,
                &argv::is_dir(&marker),
                self.exec_options(timeout).workdir("/"),
            )
            .await?;

        match result.exit_code {
            _ if result.timed_out => Err(SandboxError::io_timeout("marker check", timeout)),
            Some(0) => Ok(true),
            // `test` is silent; stderr on exit 1 comes from the runtime itself.
            Some(1) if result.stderr.trim().is_empty() => Ok(false),
            _ => Err(SandboxError::io_failure(
                "marker check",
                result.failure_message(),
            )),
        }
    }

    async fn scaffold(&self, name: &SandboxName) -> SandboxResult<()> {
        let root = self.workspace.root().to_string();
        let timeout = self.config.command_timeout();

        // The workspace directory may have been deleted out-of-band.
        let mkdir = self
            .runtime
            .exec(
                name,
                &argv::make_dir(&root),
                self.exec_options(timeout).workdir("/"),
            )
            .await?;
        if mkdir.timed_out {
            return Err(SandboxError::io_timeout("workspace mkdir", timeout));
        }
        if !mkdir.is_success() {
            return Err(SandboxError::provisioning_failed(
                name.as_str(),
                format!("cannot create {root}: {}", mkdir.failure_message()),
            ));
        }

        info!(name = %name, command = ?self.config.scaffold_command, "Scaffolding workspace");
        let timeout = self.config.scaffold_timeout();
        let result = self
            .runtime
            .exec(
                name,
                &self.config.scaffold_command,
                self.exec_options(timeout).workdir(root),
            )
            .await?;

        if result.timed_out {
            return Err(SandboxError::io_timeout("scaffold", timeout));
        }
        if !result.is_success() {
            if self.config.is_already_exists(&result.stderr) {
                info!(name = %name, "Scaffold already present");
            } else {
                return Err(SandboxError::provisioning_failed(
                    name.as_str(),
                    format!("scaffold failed: {}", result.failure_message()),
                ));
            }
        }

        if !self.marker_present(name).await? {
            return Err(SandboxError::provisioning_failed(
                name.as_str(),
                format!(
                    "scaffold finished but {} is missing",
                    self.config.marker_path()
                ),
            ));
        }
        Ok(())
    }

    async fn teardown_locked(&self, name: &SandboxName) -> SandboxResult<TeardownReport> {
        info!(name = %name, "Tearing down sandbox");

        match self.runtime.stop(name).await {
            Ok(StepOutcome::AlreadyAbsent) => debug!(name = %name, "Sandbox already absent"),
            Ok(StepOutcome::Applied) => debug!(name = %name, "Sandbox stopped"),
            Err(e) => warn!(name = %name, error = %e, "Stop failed, removing anyway"),
        }

        match self.runtime.remove(name, true).await {
            Ok(_) => {}
            Err(e) => warn!(name = %name, error = %e, "Remove failed"),
        }

        let state = self.runtime.inspect(name).await?;
        let deleted = state == RuntimeState::Absent;
        if deleted {
            self.forget_error(name);
            info!(name = %name, "Sandbox removed");
        } else {
            warn!(name = %name, state = %state, "Sandbox still present after teardown");
        }

        Ok(TeardownReport {
            deleted,
            name: name.clone(),
        })
    }

    fn create_spec(&self, name: &SandboxName) -> CreateSpec {
        CreateSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            env: self.config.env.clone(),
            labels: BTreeMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                ("keybox.name".to_string(), name.to_string()),
            ]),
            workdir: self.workspace.root().to_string(),
            command: self.config.keep_alive_command.clone(),
            timeout: self.config.create_timeout(),
        }
    }

    fn exec_options(&self, timeout: Duration) -> ExecOptions {
        ExecOptions::new(timeout).user(self.config.exec_user.clone())
    }

    fn record_outcome(&self, name: &SandboxName, result: &SandboxResult<ReadyReport>) {
        let mut errors = self.last_errors.lock().unwrap_or_else(|e| e.into_inner());
        match result {
            Ok(report) if report.ready => {
                errors.remove(name);
            }
            Ok(report) => {
                errors.insert(name.clone(), report.detail.clone());
            }
            Err(e) => {
                errors.insert(name.clone(), e.to_string());
            }
        }
    }

    fn forget_error(&self, name: &SandboxName) {
        self.last_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    fn last_error(&self, name: &SandboxName) -> Option<String> {
        self.last_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

fn describe(actions: &[LifecycleAction]) -> String {
    actions
        .iter()
        .map(|a| match a {
            LifecycleAction::Created => "create",
            LifecycleAction::Started => "start",
            LifecycleAction::Scaffolded => "scaffold",
        })
        .collect::<Vec<_>>()
        .join(", ")
}
