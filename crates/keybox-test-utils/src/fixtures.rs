//! Test fixtures for lifecycle and file bridge tests.
//!
//! Provides a fast-polling configuration, sample identities and a harness
//! wiring a [`LifecycleManager`] to a [`FakeRuntime`].

use crate::sandbox::FakeRuntime;
use keybox_sandbox::{
    LifecycleManager, SandboxConfig, SandboxName, SandboxRuntimeType, SessionRouter,
    WorkspaceFiles,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A Stellar-style public key.
pub const IDENTITY: &str = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";

/// A second, unrelated public key.
pub const OTHER_IDENTITY: &str = "GCKFBEIYV2U22IO2BJ4KVJOIP7XPWQGQFKKWXR6DOSJBV7STMAQSMTGG";

/// Config with polling shrunk to milliseconds.
pub fn test_config() -> SandboxConfig {
    SandboxConfig {
        runtime: SandboxRuntimeType::Docker,
        image: "keybox/workspace:test".to_string(),
        command_timeout_secs: 5,
        create_timeout_secs: 5,
        scaffold_timeout_secs: 5,
        poll_attempts: 3,
        poll_interval_ms: 1,
        poll_max_interval_ms: 5,
        start_attempts: 2,
        ..Default::default()
    }
}

/// Everything a lifecycle test needs, sharing one fake runtime.
#[derive(Clone)]
pub struct Harness {
    pub config: SandboxConfig,
    pub runtime: FakeRuntime,
    pub manager: LifecycleManager,
    pub files: WorkspaceFiles,
    pub router: SessionRouter,
}

impl Harness {
    /// Harness over a fresh, empty fake runtime.
    pub fn new() -> Self {
        let config = test_config();
        let runtime = FakeRuntime::new(&config);
        Self::with_runtime(config, runtime)
    }

    /// Harness over a preconfigured fake runtime.
    pub fn with_runtime(config: SandboxConfig, runtime: FakeRuntime) -> Self {
        let manager = LifecycleManager::new(config.clone(), Arc::new(runtime.clone()));
        let files = WorkspaceFiles::new(manager.clone());
        let router = SessionRouter::new(config.workspace_root.clone());
        Self {
            config,
            runtime,
            manager,
            files,
            router,
        }
    }

    /// Derived sandbox name of an identity.
    pub fn name(&self, identity: &str) -> SandboxName {
        self.manager
            .name_for(identity)
            .expect("fixture identity must be valid")
    }

    /// Absolute workspace path of a relative file.
    pub fn workspace_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.config.workspace_root)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `json` to a temporary config file.
pub fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp config");
    file.write_all(json.as_bytes())
        .expect("Failed to write temp config");
    file
}

/// Common file contents.
pub mod content {
    /// Text full of characters a shell would interpret.
    pub const SHELL_HOSTILE: &str = "let cost = \"$5\";\n// `backticks` and $(subshell) and 'quotes'\n\\n literal\n";

    /// A minimal Soroban contract.
    pub const CONTRACT: &str = r#"#![no_std]
use soroban_sdk::{contract, contractimpl, Env, Symbol};

#[contract]
pub struct Hello;

#[contractimpl]
impl Hello {
    pub fn hello(_env: Env, to: Symbol) -> Symbol {
        to
    }
}
"#;
}
