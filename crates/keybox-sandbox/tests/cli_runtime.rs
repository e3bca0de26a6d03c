//! Docker/Podman CLI runtime tests.
//!
//! Drive `CliRuntime` through a scripted command runner and check both the
//! argv it produces and how it classifies CLI answers.

use keybox_sandbox::runtime::CliRuntime;
use keybox_sandbox::{
    CommandResult, ContainerRuntime, CreateSpec, ExecOptions, RuntimeState, SandboxError,
    SandboxName, SandboxRuntimeType, StepOutcome,
};
use keybox_test_utils::ScriptedRunner;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn runtime(runner: &ScriptedRunner, runtime_type: SandboxRuntimeType) -> CliRuntime {
    CliRuntime::new(runtime_type, Arc::new(runner.clone()), Duration::from_secs(5))
        .expect("concrete runtime")
}

fn name() -> SandboxName {
    SandboxName::from_runtime("keybox-abc-123")
}

fn create_spec() -> CreateSpec {
    CreateSpec {
        name: name(),
        image: "img:1".to_string(),
        env: BTreeMap::from([("A".to_string(), "x y $z".to_string())]),
        labels: BTreeMap::from([("keybox.managed".to_string(), "true".to_string())]),
        workdir: "/workspace".to_string(),
        command: vec!["sleep".to_string(), "infinity".to_string()],
        timeout: Duration::from_secs(60),
    }
}

/// Inspect maps the running flag and "no such object" to states.
#[tokio::test]
async fn test_inspect_states() {
    let runner = ScriptedRunner::new()
        .then(CommandResult::success("true\n"))
        .then(CommandResult::success("false\n"))
        .then(CommandResult::failure(1, "Error: No such object: keybox-abc-123"))
        .then(CommandResult::failure(
            125,
            "Error: no container with name or ID \"keybox-abc-123\" found: no such container",
        ));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    assert_eq!(rt.inspect(&name()).await.unwrap(), RuntimeState::Running);
    assert_eq!(rt.inspect(&name()).await.unwrap(), RuntimeState::Stopped);
    assert_eq!(rt.inspect(&name()).await.unwrap(), RuntimeState::Absent);
    assert_eq!(rt.inspect(&name()).await.unwrap(), RuntimeState::Absent);

    let call = &runner.calls()[0];
    assert_eq!(call.program, "docker");
    assert_eq!(
        call.args,
        vec![
            "inspect",
            "--type",
            "container",
            "--format",
            "{{.State.Running}}",
            "keybox-abc-123"
        ]
    );
}

/// Podman uses its own binary with the same verbs.
#[tokio::test]
async fn test_podman_binary() {
    let runner = ScriptedRunner::new().then(CommandResult::success("true"));
    let rt = runtime(&runner, SandboxRuntimeType::Podman);

    rt.inspect(&name()).await.unwrap();
    assert_eq!(runner.last_call().unwrap().program, "podman");
    assert_eq!(rt.runtime_type(), SandboxRuntimeType::Podman);
}

/// An unreachable daemon is an error, never an absent sandbox.
#[tokio::test]
async fn test_unreachable_daemon() {
    let runner = ScriptedRunner::new().with_default_response(CommandResult::failure(
        1,
        "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
    ));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    let err = rt.inspect(&name()).await.unwrap_err();
    assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
    assert!(err.is_transient());

    let err = rt.stop(&name()).await.unwrap_err();
    assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));

    let err = rt
        .exec(&name(), &["ls".to_string()], ExecOptions::new(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
}

/// Unknown inspect failures and timeouts surface as I/O failures.
#[tokio::test]
async fn test_inspect_failures() {
    let runner = ScriptedRunner::new()
        .then(CommandResult::failure(2, "permission denied"))
        .then(CommandResult::timeout())
        .then(CommandResult::success("maybe"));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    let err = rt.inspect(&name()).await.unwrap_err();
    assert!(matches!(err, SandboxError::IoFailure { .. }));
    assert!(!err.is_transient());

    let err = rt.inspect(&name()).await.unwrap_err();
    assert!(err.is_timeout());

    assert!(rt.inspect(&name()).await.is_err());
}

/// Create passes env and labels as discrete argv entries.
#[tokio::test]
async fn test_create_argv() {
    let runner = ScriptedRunner::new().then(CommandResult::success("abc123\n"));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    assert!(rt.create(&create_spec()).await.unwrap());

    let call = runner.last_call().unwrap();
    assert_eq!(call.timeout, Duration::from_secs(60));
    assert_eq!(
        call.args,
        vec![
            "run",
            "-d",
            "--name",
            "keybox-abc-123",
            "--label",
            "keybox.managed=true",
            "-w",
            "/workspace",
            "-e",
            "A=x y $z",
            "img:1",
            "sleep",
            "infinity",
        ]
    );
}

/// A name conflict means another caller won the race.
#[tokio::test]
async fn test_create_conflict() {
    let runner = ScriptedRunner::new().then(CommandResult::failure(
        125,
        "docker: Error response from daemon: Conflict. The container name \"/keybox-abc-123\" is already in use by container \"f00\".",
    ));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    assert!(!rt.create(&create_spec()).await.unwrap());
}

/// Any other create failure is fatal and carries stderr.
#[tokio::test]
async fn test_create_failure() {
    let runner = ScriptedRunner::new()
        .then(CommandResult::failure(
            125,
            "Unable to find image 'img:1' locally\nError: pull access denied",
        ))
        .then(CommandResult::timeout());
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    let err = rt.create(&create_spec()).await.unwrap_err();
    assert!(matches!(err, SandboxError::ProvisioningFailed { .. }));
    assert!(err.to_string().contains("pull access denied"));
    assert!(!err.is_transient());

    let err = rt.create(&create_spec()).await.unwrap_err();
    assert!(err.is_timeout());
}

/// Stop and remove absorb "not found".
#[tokio::test]
async fn test_stop_remove_absent() {
    let runner = ScriptedRunner::new()
        .then(CommandResult::failure(
            1,
            "Error response from daemon: No such container: keybox-abc-123",
        ))
        .then(CommandResult::failure(
            1,
            "Error response from daemon: No such container: keybox-abc-123",
        ))
        .then(CommandResult::success("keybox-abc-123\n"))
        .then(CommandResult::failure(1, "Error: device or resource busy"));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);

    assert_eq!(rt.stop(&name()).await.unwrap(), StepOutcome::AlreadyAbsent);
    assert_eq!(
        rt.remove(&name(), true).await.unwrap(),
        StepOutcome::AlreadyAbsent
    );
    assert_eq!(rt.remove(&name(), false).await.unwrap(), StepOutcome::Applied);
    assert!(rt.start(&name()).await.is_err());

    let calls = runner.calls();
    assert_eq!(calls[0].args, vec!["stop", "-t", "10", "keybox-abc-123"]);
    assert_eq!(calls[1].args, vec!["rm", "-f", "keybox-abc-123"]);
    assert_eq!(calls[2].args, vec!["rm", "keybox-abc-123"]);
    assert_eq!(calls[3].args, vec!["start", "keybox-abc-123"]);
}

/// Exec keeps untrusted values as argv entries and content on stdin.
#[tokio::test]
async fn test_exec_argv_and_stdin() {
    let runner = ScriptedRunner::new().then(CommandResult::failure(1, "cat: x: No such file"));
    let rt = runtime(&runner, SandboxRuntimeType::Docker);
    let argv = vec![
        "cat".to_string(),
        "--".to_string(),
        "/workspace/$(x)".to_string(),
    ];
    let options = ExecOptions::new(Duration::from_secs(3))
        .user(Some("dev".to_string()))
        .workdir("/workspace")
        .stdin("payload");

    let result = rt.exec(&name(), &argv, options).await.unwrap();
    assert_eq!(result.exit_code, Some(1));

    let call = runner.last_call().unwrap();
    assert_eq!(call.timeout, Duration::from_secs(3));
    assert_eq!(
        call.args,
        vec![
            "exec",
            "-i",
            "-u",
            "dev",
            "-w",
            "/workspace",
            "keybox-abc-123",
            "cat",
            "--",
            "/workspace/$(x)",
        ]
    );
    assert_eq!(call.stdin.as_deref(), Some(&b"payload"[..]));
}
