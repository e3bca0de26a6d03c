//! `keybox config` and `keybox name`.

use keybox_sandbox::{name_for, SandboxConfig};
use std::path::PathBuf;
use std::process::ExitCode;

/// Print the effective configuration as JSON.
///
/// The files that contributed are listed on stderr so stdout stays valid
/// JSON.
pub fn show_config(config: &SandboxConfig, sources: &[PathBuf]) -> anyhow::Result<ExitCode> {
    for source in sources {
        eprintln!("# from {}", source.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(ExitCode::SUCCESS)
}

/// Print the sandbox name derived for an identity. Needs no runtime.
pub fn show_name(config: &SandboxConfig, identity: &str) -> anyhow::Result<ExitCode> {
    println!("{}", name_for(&config.name_prefix, identity)?);
    Ok(ExitCode::SUCCESS)
}
