//! CLI integration tests.
//!
//! Only commands that need no container runtime are exercised here. Config
//! and state directories point at a temp dir so the user's own files are
//! never read or written.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

const IDENTITY: &str = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";

fn keybox(home: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keybox"))
        .args(args)
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env_remove("KEYBOX_CONFIG_CONTENT")
        .env_remove("KEYBOX_RUNTIME")
        .env_remove("KEYBOX_IMAGE")
        .env_remove("KEYBOX_WORKSPACE")
        .env_remove("KEYBOX_EXEC_USER")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_help_command() {
    let home = TempDir::new().unwrap();
    let output = keybox(&home, &["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["serve", "ensure", "health", "status", "teardown", "files", "config"] {
        assert!(text.contains(command), "missing {command}");
    }
}

#[test]
fn test_name_is_stable() {
    let home = TempDir::new().unwrap();

    let first = keybox(&home, &["name", IDENTITY]);
    let second = keybox(&home, &["name", IDENTITY]);

    assert!(first.status.success());
    let name = stdout(&first).trim().to_string();
    assert!(name.starts_with("keybox-gbrpyhil"));
    assert_eq!(name, stdout(&second).trim());
}

#[test]
fn test_name_rejects_blank_identity() {
    let home = TempDir::new().unwrap();

    let output = keybox(&home, &["name", "   "]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid identity"));
}

#[test]
fn test_config_defaults() {
    let home = TempDir::new().unwrap();

    let output = keybox(&home, &["config"]);

    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(config["workspace_root"], "/workspace");
    assert_eq!(config["runtime"], "auto");
}

#[test]
fn test_config_file_and_env_layering() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("keybox.json");
    fs::write(
        &file,
        r#"{ "image": "example/stellar:1", "name_prefix": "kb", "runtime": "podman" }"#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_keybox"))
        .args(["--config", file.to_str().unwrap(), "config"])
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env_remove("KEYBOX_CONFIG_CONTENT")
        .env_remove("KEYBOX_RUNTIME")
        .env("KEYBOX_IMAGE", "example/stellar:2")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(config["image"], "example/stellar:2");
    assert_eq!(config["name_prefix"], "kb");
    assert_eq!(config["runtime"], "podman");

    let name = keybox(&home, &["--config", file.to_str().unwrap(), "name", IDENTITY]);
    assert!(stdout(&name).starts_with("kb-"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = TempDir::new().unwrap();

    let output = keybox(&home, &["--config", "/nonexistent/keybox.json", "config"]);

    assert!(!output.status.success());
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("keybox.json");
    fs::write(&file, r#"{ "workspace_root": "relative/path" }"#).unwrap();

    let output = keybox(&home, &["--config", file.to_str().unwrap(), "config"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("workspace_root"));
}
