//! Workspace file bridge integration tests.

use keybox_sandbox::SandboxError;
use keybox_test_utils::fixtures::{content, test_config, IDENTITY};
use keybox_test_utils::{FakeRuntime, Harness};

async fn ready_harness() -> Harness {
    let h = Harness::new();
    h.manager
        .ensure_ready(IDENTITY)
        .await
        .expect("sandbox should provision");
    h.runtime.clear_calls();
    h
}

/// Content with shell metacharacters survives a write/read round trip.
#[tokio::test]
async fn test_write_then_read_round_trip() {
    let h = ready_harness().await;

    h.files
        .write_file(IDENTITY, "contracts/hello/src/lib.rs", content::SHELL_HOSTILE.as_bytes())
        .await
        .expect("write");
    let read = h
        .files
        .read_file(IDENTITY, "contracts/hello/src/lib.rs")
        .await
        .expect("read");

    assert_eq!(read, content::SHELL_HOSTILE.as_bytes());
}

/// Binary content is passed through untouched.
#[tokio::test]
async fn test_binary_round_trip() {
    let h = ready_harness().await;
    let bytes: Vec<u8> = (0..=255).collect();

    h.files.write_file(IDENTITY, "blob.bin", &bytes).await.unwrap();

    assert_eq!(h.files.read_file(IDENTITY, "blob.bin").await.unwrap(), bytes);
}

/// Writes replace the whole file.
#[tokio::test]
async fn test_write_overwrites() {
    let h = ready_harness().await;

    h.files
        .write_file(IDENTITY, "notes.md", b"a much longer first version")
        .await
        .unwrap();
    h.files.write_file(IDENTITY, "notes.md", b"short").await.unwrap();

    assert_eq!(h.files.read_file(IDENTITY, "notes.md").await.unwrap(), b"short");
}

/// Parent directories are created on write.
#[tokio::test]
async fn test_write_creates_parents() {
    let h = ready_harness().await;
    let name = h.name(IDENTITY);

    h.files
        .write_file(IDENTITY, "deep/nested/dir/file.rs", content::CONTRACT.as_bytes())
        .await
        .unwrap();

    assert!(h.runtime.has_dir(&name, "/workspace/deep/nested/dir"));
    assert_eq!(
        h.runtime.file(&name, "/workspace/deep/nested/dir/file.rs"),
        Some(content::CONTRACT.as_bytes().to_vec())
    );
}

/// Leading separators and the workspace prefix name the same file.
#[tokio::test]
async fn test_path_forms_are_equivalent() {
    let h = ready_harness().await;

    h.files.write_file(IDENTITY, "/src/a.rs", b"one").await.unwrap();

    for path in ["src/a.rs", "./src/a.rs", "/workspace/src/a.rs", "\\src\\a.rs"] {
        assert_eq!(
            h.files.read_file(IDENTITY, path).await.unwrap(),
            b"one",
            "path form {path}"
        );
    }
}

/// Traversal is rejected before any runtime call.
#[tokio::test]
async fn test_traversal_rejected_without_runtime_call() {
    let h = ready_harness().await;

    let err = h
        .files
        .read_file(IDENTITY, "../../etc/passwd")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath(_)));

    let err = h
        .files
        .write_file(IDENTITY, "src/../../x", b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidPath(_)));

    assert!(h.runtime.calls().is_empty());
}

/// Reading a missing file is FileNotFound.
#[tokio::test]
async fn test_read_missing_file() {
    let h = ready_harness().await;

    let err = h.files.read_file(IDENTITY, "nope.rs").await.unwrap_err();

    assert!(matches!(err, SandboxError::FileNotFound(ref p) if p == "nope.rs"));
}

/// Reading a directory is an I/O failure, not a missing file.
#[tokio::test]
async fn test_read_directory() {
    let h = ready_harness().await;

    let err = h.files.read_file(IDENTITY, "contracts").await.unwrap_err();

    assert!(matches!(err, SandboxError::IoFailure { .. }));
}

/// File operations need a running sandbox and never start one.
#[tokio::test]
async fn test_requires_running_sandbox() {
    let h = Harness::new();

    let err = h.files.list_files(IDENTITY).await.unwrap_err();
    assert!(err.is_not_running());

    let err = h.files.write_file(IDENTITY, "a.rs", b"x").await.unwrap_err();
    assert!(err.is_not_running());

    assert!(h.runtime.mutations().is_empty());
    assert_eq!(h.runtime.count("create"), 0);
}

/// Listing returns workspace-relative paths and skips build directories.
#[tokio::test]
async fn test_list_files() {
    let h = ready_harness().await;

    h.files.write_file(IDENTITY, "src/new.rs", b"x").await.unwrap();
    h.files
        .write_file(IDENTITY, "target/debug/build.log", b"x")
        .await
        .unwrap();
    h.files
        .write_file(IDENTITY, "contracts/hello/node_modules/x.js", b"x")
        .await
        .unwrap();
    h.files.write_file(IDENTITY, ".git/HEAD", b"x").await.unwrap();

    let mut files = h.files.list_files(IDENTITY).await.unwrap();
    files.sort();

    assert_eq!(
        files,
        vec![
            "Cargo.toml",
            "contracts/hello_world/src/lib.rs",
            "src/new.rs",
        ]
    );
}

/// Listing a workspace deleted out-of-band fails cleanly.
#[tokio::test]
async fn test_list_missing_workspace() {
    let h = ready_harness().await;
    h.runtime.remove_dir(&h.name(IDENTITY), "/workspace");

    let err = h.files.list_files(IDENTITY).await.unwrap_err();

    assert!(matches!(err, SandboxError::IoFailure { .. }));
}

/// A workspace deleted out of band is an I/O failure, not a missing file.
#[tokio::test]
async fn test_read_with_missing_workspace() {
    let h = ready_harness().await;
    h.files
        .write_file(IDENTITY, "Cargo.toml", b"[package]")
        .await
        .expect("write");
    h.runtime.remove_dir(&h.name(IDENTITY), "/workspace");

    let err = h.files.read_file(IDENTITY, "Cargo.toml").await.unwrap_err();

    assert!(matches!(err, SandboxError::IoFailure { .. }), "{err:?}");
    assert!(err.to_string().contains("/workspace is missing"));
}

/// Bridge timeouts surface as transient I/O failures.
#[tokio::test]
async fn test_read_timeout() {
    let config = test_config();
    let runtime = FakeRuntime::new(&config).with_exec_timeout("cat");
    let h = Harness::with_runtime(config, runtime);
    h.manager.ensure_ready(IDENTITY).await.unwrap();

    let err = h.files.read_file(IDENTITY, "Cargo.toml").await.unwrap_err();

    assert!(err.is_timeout());
    assert!(err.is_transient());
}
