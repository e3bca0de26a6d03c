//! In-memory container runtime.
//!
//! [`FakeRuntime`] implements [`ContainerRuntime`] without Docker or
//! Podman. Containers live in a map with a tiny filesystem each, and every
//! call is recorded so tests can assert exactly which runtime operations a
//! lifecycle or file call performed.

use async_trait::async_trait;
use keybox_sandbox::files::argv;
use keybox_sandbox::{
    CommandResult, ContainerRuntime, CreateSpec, ExecOptions, RuntimeState, SandboxConfig,
    SandboxError, SandboxName, SandboxResult, SandboxRuntimeType, StepOutcome,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Inspect(SandboxName),
    Create(SandboxName),
    Start(SandboxName),
    Stop(SandboxName),
    Remove(SandboxName),
    Exec { name: SandboxName, argv: Vec<String> },
}

impl RuntimeCall {
    /// Whether the call can change sandbox state.
    ///
    /// Checks, reads and listings are not mutations.
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Inspect(_) => false,
            Self::Exec { argv, .. } => !matches!(
                argv.first().map(String::as_str),
                Some("test") | Some("cat") | Some("find")
            ),
            _ => true,
        }
    }

    /// Short name of the call, e.g. `"create"` or `"exec:mkdir"`.
    pub fn label(&self) -> String {
        match self {
            Self::Inspect(_) => "inspect".to_string(),
            Self::Create(_) => "create".to_string(),
            Self::Start(_) => "start".to_string(),
            Self::Stop(_) => "stop".to_string(),
            Self::Remove(_) => "remove".to_string(),
            Self::Exec { argv, .. } => {
                format!("exec:{}", argv.first().map(String::as_str).unwrap_or(""))
            }
        }
    }
}

/// How the fake answers the configured scaffold command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaffoldBehavior {
    /// Create the marker and a starter project
    Succeed,
    /// Create the marker but exit non-zero with an "already exists" message
    AlreadyExists,
    /// Exit non-zero with the given stderr, creating nothing
    Fail(String),
    /// Exit zero without creating the marker
    SucceedWithoutMarker,
}

/// A container held by the fake runtime.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub state: RuntimeState,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl FakeContainer {
    fn new(state: RuntimeState) -> Self {
        Self {
            state,
            image: String::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_string()]),
            files: BTreeMap::new(),
        }
    }

    fn mkdir_all(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    fn remove_tree(&mut self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.dirs.retain(|d| d != path && !d.starts_with(&prefix));
        self.files.retain(|f, _| f != path && !f.starts_with(&prefix));
    }
}

#[derive(Debug, Default)]
struct Behavior {
    unavailable: bool,
    create_failure: Option<String>,
    start_stuck: bool,
    stop_failure: Option<String>,
    remove_failure: Option<String>,
    scaffold: Option<ScaffoldBehavior>,
    exec_timeouts: Vec<String>,
    delay: Duration,
}

#[derive(Debug, Default)]
struct Tracking {
    calls: Vec<RuntimeCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// An in-memory [`ContainerRuntime`].
///
/// Understands the commands the file bridge and lifecycle manager run
/// (`test -d`, `mkdir -p`, `cat`, the write script, `find`) plus the
/// scaffold command of the config it was built from.
///
/// # Example
///
/// ```rust,ignore
/// use keybox_test_utils::{fixtures::test_config, sandbox::FakeRuntime};
/// use keybox_sandbox::LifecycleManager;
/// use std::sync::Arc;
///
/// #[tokio::test]
/// async fn test_first_ensure_creates() {
///     let config = test_config();
///     let runtime = FakeRuntime::new(&config);
///     let manager = LifecycleManager::new(config, Arc::new(runtime.clone()));
///
///     let report = manager.ensure_ready("GABC").await.unwrap();
///     assert!(report.ready);
///     assert_eq!(runtime.count("create"), 1);
/// }
/// ```
#[derive(Clone)]
pub struct FakeRuntime {
    containers: Arc<Mutex<HashMap<SandboxName, FakeContainer>>>,
    behavior: Arc<Mutex<Behavior>>,
    tracking: Arc<Mutex<Tracking>>,
    scaffold_command: Vec<String>,
    marker_path: String,
}

impl FakeRuntime {
    /// Create a fake runtime for sandboxes built from `config`.
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            behavior: Arc::new(Mutex::new(Behavior::default())),
            tracking: Arc::new(Mutex::new(Tracking::default())),
            scaffold_command: config.scaffold_command.clone(),
            marker_path: config.marker_path(),
        }
    }

    /// Add a container that already exists.
    pub fn with_container(self, name: &SandboxName, state: RuntimeState) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.clone(), FakeContainer::new(state));
        self
    }

    /// Add a file (and its parent directories) to an existing container.
    pub fn with_file(self, name: &SandboxName, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.write(name, path, content.as_ref().to_vec());
        self
    }

    /// Make every call fail as if the daemon were unreachable.
    pub fn with_unavailable(self) -> Self {
        self.behavior.lock().unwrap().unavailable = true;
        self
    }

    /// Make `create` fail with the given stderr.
    pub fn with_create_failure(self, stderr: impl Into<String>) -> Self {
        self.behavior.lock().unwrap().create_failure = Some(stderr.into());
        self
    }

    /// Make `start` report success while the container stays stopped.
    pub fn with_start_stuck(self) -> Self {
        self.behavior.lock().unwrap().start_stuck = true;
        self
    }

    /// Make `stop` fail with the given message.
    pub fn with_stop_failure(self, message: impl Into<String>) -> Self {
        self.behavior.lock().unwrap().stop_failure = Some(message.into());
        self
    }

    /// Make `remove` fail with the given message.
    pub fn with_remove_failure(self, message: impl Into<String>) -> Self {
        self.behavior.lock().unwrap().remove_failure = Some(message.into());
        self
    }

    /// Control the scaffold command's outcome.
    pub fn with_scaffold(self, behavior: ScaffoldBehavior) -> Self {
        self.behavior.lock().unwrap().scaffold = Some(behavior);
        self
    }

    /// Make exec calls whose argv starts with `program` time out.
    pub fn with_exec_timeout(self, program: impl Into<String>) -> Self {
        self.behavior
            .lock()
            .unwrap()
            .exec_timeouts
            .push(program.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.behavior.lock().unwrap().delay = delay;
        self
    }

    /// Current state of a container.
    pub fn state_of(&self, name: &SandboxName) -> RuntimeState {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.state)
            .unwrap_or(RuntimeState::Absent)
    }

    /// Change a container's state out-of-band.
    pub fn set_state(&self, name: &SandboxName, state: RuntimeState) {
        let mut containers = self.containers.lock().unwrap();
        if state == RuntimeState::Absent {
            containers.remove(name);
        } else {
            containers
                .entry(name.clone())
                .or_insert_with(|| FakeContainer::new(state))
                .state = state;
        }
    }

    /// Delete a directory tree inside a container out-of-band.
    pub fn remove_dir(&self, name: &SandboxName, path: &str) {
        if let Some(container) = self.containers.lock().unwrap().get_mut(name) {
            container.remove_tree(path);
        }
    }

    /// Snapshot of a container.
    pub fn container(&self, name: &SandboxName) -> Option<FakeContainer> {
        self.containers.lock().unwrap().get(name).cloned()
    }

    /// Content of a file inside a container.
    pub fn file(&self, name: &SandboxName, path: &str) -> Option<Vec<u8>> {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|c| c.files.get(path).cloned())
    }

    /// Whether a directory exists inside a container.
    pub fn has_dir(&self, name: &SandboxName, path: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|c| c.dirs.contains(path))
    }

    /// All recorded calls, in the order they took effect.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.tracking.lock().unwrap().calls.clone()
    }

    /// Recorded calls that can change sandbox state.
    pub fn mutations(&self) -> Vec<RuntimeCall> {
        self.calls().into_iter().filter(|c| c.is_mutation()).collect()
    }

    /// Labels of all recorded calls.
    pub fn labels(&self) -> Vec<String> {
        self.calls().iter().map(RuntimeCall::label).collect()
    }

    /// Number of recorded calls with the given label.
    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| c.label() == label).count()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.tracking.lock().unwrap().max_in_flight
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        let mut tracking = self.tracking.lock().unwrap();
        tracking.calls.clear();
        tracking.max_in_flight = 0;
    }

    /// Run one call: honour the configured delay, then apply and record it.
    async fn call<T>(
        &self,
        record: RuntimeCall,
        apply: impl FnOnce(&Self) -> SandboxResult<T>,
    ) -> SandboxResult<T> {
        let (delay, unavailable) = {
            let behavior = self.behavior.lock().unwrap();
            (behavior.delay, behavior.unavailable)
        };

        {
            let mut tracking = self.tracking.lock().unwrap();
            tracking.in_flight += 1;
            tracking.max_in_flight = tracking.max_in_flight.max(tracking.in_flight);
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if unavailable {
            Err(SandboxError::runtime_unavailable(
                "Cannot connect to the Docker daemon",
            ))
        } else {
            apply(self)
        };

        let mut tracking = self.tracking.lock().unwrap();
        tracking.in_flight -= 1;
        tracking.calls.push(record);
        result
    }

    fn write(&self, name: &SandboxName, path: &str, content: Vec<u8>) {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .entry(name.clone())
            .or_insert_with(|| FakeContainer::new(RuntimeState::Running));
        if let Some((parent, _)) = path.rsplit_once('/') {
            container.mkdir_all(parent);
        }
        container.files.insert(path.to_string(), content);
    }

    fn exec_in(
        &self,
        name: &SandboxName,
        argv: &[String],
        options: &ExecOptions,
    ) -> CommandResult {
        {
            let behavior = self.behavior.lock().unwrap();
            if let Some(program) = argv.first() {
                if behavior.exec_timeouts.contains(program) {
                    return CommandResult::timeout();
                }
            }
        }

        let mut containers = self.containers.lock().unwrap();
        let container = match containers.get_mut(name) {
            Some(c) if c.state == RuntimeState::Running => c,
            Some(_) => {
                return CommandResult::failure(
                    1,
                    format!("Error response from daemon: container {name} is not running"),
                )
            }
            None => {
                return CommandResult::failure(
                    1,
                    format!("Error response from daemon: No such container: {name}"),
                )
            }
        };

        let workdir = options.workdir.clone().unwrap_or_else(|| "/".to_string());
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();

        // The runtime enters the workdir before running anything.
        if workdir != "/" && !container.dirs.contains(&workdir) {
            return CommandResult::failure(
                126,
                format!(
                    "OCI runtime exec failed: exec failed: unable to start container process: \
                     chdir to cwd (\"{workdir}\") set in config.json failed: no such file or directory"
                ),
            );
        }

        if argv == self.scaffold_command.as_slice() {
            let behavior = self
                .behavior
                .lock()
                .unwrap()
                .scaffold
                .clone()
                .unwrap_or(ScaffoldBehavior::Succeed);
            return self.scaffold(container, &workdir, behavior);
        }

        match args.as_slice() {
            ["test", "-d", path] => {
                if container.dirs.contains(*path) {
                    CommandResult::success("")
                } else {
                    CommandResult::failure(1, "")
                }
            }
            ["mkdir", "-p", path] => {
                container.mkdir_all(path);
                CommandResult::success("")
            }
            ["cat", "--", path] => match container.files.get(*path) {
                Some(content) => CommandResult::success(content.clone()),
                None if container.dirs.contains(*path) => {
                    CommandResult::failure(1, format!("cat: {path}: Is a directory"))
                }
                None => CommandResult::failure(1, format!("cat: {path}: No such file or directory")),
            },
            ["sh", "-c", script, "sh", path] if *script == argv::WRITE_SCRIPT => {
                if let Some((parent, _)) = path.rsplit_once('/') {
                    container.mkdir_all(parent);
                }
                container
                    .files
                    .insert(path.to_string(), options.stdin.clone().unwrap_or_default());
                CommandResult::success("")
            }
            ["find", ".", rest @ ..] => {
                let excluded: Vec<&str> = rest
                    .windows(2)
                    .filter(|w| w[0] == "-name")
                    .map(|w| w[1])
                    .collect();
                let prefix = format!("{}/", workdir.trim_end_matches('/'));
                let mut out = Vec::new();
                for path in container.files.keys() {
                    let Some(relative) = path.strip_prefix(&prefix) else {
                        continue;
                    };
                    let (dirs, _file) = relative.rsplit_once('/').unwrap_or(("", relative));
                    if dirs.split('/').any(|d| excluded.contains(&d)) {
                        continue;
                    }
                    out.extend_from_slice(format!("./{relative}\0").as_bytes());
                }
                CommandResult::success(out)
            }
            _ => CommandResult::failure(127, format!("sh: {}: not found", args.join(" "))),
        }
    }

    fn scaffold(
        &self,
        container: &mut FakeContainer,
        workdir: &str,
        behavior: ScaffoldBehavior,
    ) -> CommandResult {
        let populate = |container: &mut FakeContainer| {
            container.mkdir_all(&self.marker_path);
            let root = workdir.trim_end_matches('/');
            container
                .files
                .insert(format!("{root}/Cargo.toml"), b"[workspace]\n".to_vec());
            container.files.insert(
                format!("{}/hello_world/src/lib.rs", self.marker_path),
                b"#![no_std]\n".to_vec(),
            );
            container.mkdir_all(&format!("{}/hello_world/src", self.marker_path));
        };

        match behavior {
            ScaffoldBehavior::Succeed => {
                populate(container);
                CommandResult::success("")
            }
            ScaffoldBehavior::AlreadyExists => {
                populate(container);
                CommandResult::failure(1, "error: project already exists in this directory")
            }
            ScaffoldBehavior::Fail(stderr) => CommandResult::failure(1, stderr),
            ScaffoldBehavior::SucceedWithoutMarker => CommandResult::success(""),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn runtime_type(&self) -> SandboxRuntimeType {
        SandboxRuntimeType::Docker
    }

    async fn inspect(&self, name: &SandboxName) -> SandboxResult<RuntimeState> {
        self.call(RuntimeCall::Inspect(name.clone()), |rt| Ok(rt.state_of(name)))
            .await
    }

    async fn create(&self, spec: &CreateSpec) -> SandboxResult<bool> {
        self.call(RuntimeCall::Create(spec.name.clone()), |rt| {
            let mut containers = rt.containers.lock().unwrap();
            if containers.contains_key(&spec.name) {
                return Ok(false);
            }
            if let Some(stderr) = rt.behavior.lock().unwrap().create_failure.clone() {
                return Err(SandboxError::provisioning_failed(
                    spec.name.as_str(),
                    format!("exit code 125: {stderr}"),
                ));
            }

            let mut container = FakeContainer::new(RuntimeState::Running);
            container.image = spec.image.clone();
            container.env = spec.env.clone();
            container.labels = spec.labels.clone();
            container.mkdir_all(&spec.workdir);
            containers.insert(spec.name.clone(), container);
            Ok(true)
        })
        .await
    }

    async fn start(&self, name: &SandboxName) -> SandboxResult<StepOutcome> {
        self.call(RuntimeCall::Start(name.clone()), |rt| {
            let stuck = rt.behavior.lock().unwrap().start_stuck;
            let mut containers = rt.containers.lock().unwrap();
            match containers.get_mut(name) {
                None => Ok(StepOutcome::AlreadyAbsent),
                Some(container) => {
                    if !stuck {
                        container.state = RuntimeState::Running;
                    }
                    Ok(StepOutcome::Applied)
                }
            }
        })
        .await
    }

    async fn stop(&self, name: &SandboxName) -> SandboxResult<StepOutcome> {
        self.call(RuntimeCall::Stop(name.clone()), |rt| {
            if let Some(message) = rt.behavior.lock().unwrap().stop_failure.clone() {
                return Err(SandboxError::io_failure("stop", message));
            }
            let mut containers = rt.containers.lock().unwrap();
            match containers.get_mut(name) {
                None => Ok(StepOutcome::AlreadyAbsent),
                Some(container) => {
                    container.state = RuntimeState::Stopped;
                    Ok(StepOutcome::Applied)
                }
            }
        })
        .await
    }

    async fn remove(&self, name: &SandboxName, force: bool) -> SandboxResult<StepOutcome> {
        self.call(RuntimeCall::Remove(name.clone()), |rt| {
            if let Some(message) = rt.behavior.lock().unwrap().remove_failure.clone() {
                return Err(SandboxError::io_failure("remove", message));
            }
            let mut containers = rt.containers.lock().unwrap();
            match containers.get(name).map(|c| c.state) {
                None => Ok(StepOutcome::AlreadyAbsent),
                Some(RuntimeState::Running) if !force => Err(SandboxError::io_failure(
                    "remove",
                    "cannot remove a running container",
                )),
                Some(_) => {
                    containers.remove(name);
                    Ok(StepOutcome::Applied)
                }
            }
        })
        .await
    }

    async fn exec(
        &self,
        name: &SandboxName,
        argv: &[String],
        options: ExecOptions,
    ) -> SandboxResult<CommandResult> {
        let record = RuntimeCall::Exec {
            name: name.clone(),
            argv: argv.to_vec(),
        };
        self.call(record, |rt| Ok(rt.exec_in(name, argv, &options)))
            .await
    }
}
