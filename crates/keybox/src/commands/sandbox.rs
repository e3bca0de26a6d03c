//! Sandbox lifecycle command handlers.

use keybox_sandbox::{LifecycleManager, SandboxConfig};
use serde::Serialize;
use std::process::ExitCode;

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Bring a sandbox up. Exits 2 when it did not become ready in time.
pub async fn handle_ensure(config: SandboxConfig, identity: &str) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    let report = manager.ensure_ready(identity).await?;
    print_json(&report)?;
    Ok(if report.ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// Exits 1 when the sandbox is not running.
pub async fn handle_health(config: SandboxConfig, identity: &str) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    let running = manager.health_check(identity).await?;
    print_json(&serde_json::json!({ "running": running }))?;
    Ok(if running {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn handle_status(config: SandboxConfig, identity: &str) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    print_json(&manager.status(identity).await?)?;
    Ok(ExitCode::SUCCESS)
}

/// Exits 1 when the sandbox could not be verified gone.
pub async fn handle_teardown(config: SandboxConfig, identity: &str) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    let report = manager.teardown(identity).await?;
    print_json(&report)?;
    Ok(if report.deleted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
