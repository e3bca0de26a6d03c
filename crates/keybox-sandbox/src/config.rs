//! Configuration types for sandbox settings.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/keybox/config.json`
//! 2. Explicit config file passed by the caller
//! 3. Environment variable: `KEYBOX_CONFIG_CONTENT` (inline JSON)
//! 4. Scalar environment overrides: `KEYBOX_*` variables

use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default container image used for new sandboxes.
pub const DEFAULT_IMAGE: &str = "keybox/workspace:latest";

/// Canonical workspace root inside every sandbox.
pub const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";

/// Prefix for every sandbox name handed to the runtime.
pub const DEFAULT_NAME_PREFIX: &str = "keybox";

/// Main sandbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container runtime to drive
    pub runtime: SandboxRuntimeType,

    /// Container image for new sandboxes
    pub image: String,

    /// Prefix of derived sandbox names
    pub name_prefix: String,

    /// Workspace root inside the sandbox
    pub workspace_root: String,

    /// Directory (relative to the workspace root) whose presence means the
    /// scaffold has been initialized
    pub marker_dir: String,

    /// Command run inside the sandbox (in the workspace root) to scaffold
    /// the project
    pub scaffold_command: Vec<String>,

    /// Case-insensitive stderr fragments that mean the scaffold already ran
    pub already_exists_patterns: Vec<String>,

    /// Foreground command that keeps the container alive
    pub keep_alive_command: Vec<String>,

    /// Environment passed to new sandboxes
    pub env: BTreeMap<String, String>,

    /// User for commands executed inside the sandbox
    pub exec_user: Option<String>,

    /// Directory names skipped when listing workspace files
    pub list_exclude_dirs: Vec<String>,

    /// Language server started for interactive sessions
    pub lsp_command: Vec<String>,

    /// Timeout for ordinary runtime commands, in seconds
    pub command_timeout_secs: u64,

    /// Timeout for creating a sandbox (may include an image pull), in seconds
    pub create_timeout_secs: u64,

    /// Timeout for the scaffold command, in seconds
    pub scaffold_timeout_secs: u64,

    /// Maximum state checks while waiting for a sandbox to run
    pub poll_attempts: u32,

    /// Delay before the first re-check, in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for the delay between checks, in milliseconds
    pub poll_max_interval_ms: u64,

    /// How many times a stopped sandbox is started before giving up
    pub start_attempts: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: SandboxRuntimeType::default(),
            image: DEFAULT_IMAGE.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            workspace_root: DEFAULT_WORKSPACE_ROOT.to_string(),
            marker_dir: "contracts".to_string(),
            scaffold_command: vec![
                "stellar".to_string(),
                "contract".to_string(),
                "init".to_string(),
                ".".to_string(),
            ],
            already_exists_patterns: vec!["already exists".to_string()],
            keep_alive_command: vec!["sleep".to_string(), "infinity".to_string()],
            env: BTreeMap::from([
                ("TERM".to_string(), "dumb".to_string()),
                ("NO_COLOR".to_string(), "1".to_string()),
            ]),
            exec_user: None,
            list_exclude_dirs: vec![
                "target".to_string(),
                ".git".to_string(),
                "node_modules".to_string(),
            ],
            lsp_command: vec!["rust-analyzer".to_string()],
            command_timeout_secs: 30,
            create_timeout_secs: 300,
            scaffold_timeout_secs: 180,
            poll_attempts: 10,
            poll_interval_ms: 250,
            poll_max_interval_ms: 2_000,
            start_attempts: 2,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from all sources.
    ///
    /// `explicit` is a config file named on the command line; unlike the
    /// global file it must exist.
    pub fn load(explicit: Option<&Path>) -> SandboxResult<(Self, Vec<PathBuf>)> {
        let mut config = Self::default();
        let mut sources = Vec::new();

        if let Some(path) = Self::global_config_path().filter(|p| p.exists()) {
            config = config.merge_json(&read_to_string(&path)?, &path.display().to_string())?;
            sources.push(path);
        }

        if let Some(path) = explicit {
            config = config.merge_json(&read_to_string(path)?, &path.display().to_string())?;
            sources.push(path.to_path_buf());
        }

        if let Ok(content) = std::env::var("KEYBOX_CONFIG_CONTENT") {
            config = config.merge_json(&content, "<env>")?;
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        debug!(sources = ?sources, runtime = ?config.runtime, "Sandbox config loaded");
        Ok((config, sources))
    }

    /// Path of the global config file.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("keybox").join("config.json"))
    }

    /// Overlay a JSON document onto this config.
    ///
    /// Only keys present in the document are replaced.
    pub fn merge_json(self, content: &str, origin: &str) -> SandboxResult<Self> {
        let overlay: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| SandboxError::Config(format!("{origin}: {e}")))?;
        if !overlay.is_object() {
            return Err(SandboxError::Config(format!(
                "{origin}: expected a JSON object"
            )));
        }

        let mut base = serde_json::to_value(&self)?;
        if let (Some(base), Some(overlay)) = (base.as_object_mut(), overlay.as_object()) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }

        serde_json::from_value(base).map_err(|e| SandboxError::Config(format!("{origin}: {e}")))
    }

    /// Apply `KEYBOX_*` scalar overrides using the given variable lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> SandboxResult<()> {
        if let Some(runtime) = lookup("KEYBOX_RUNTIME") {
            self.runtime = SandboxRuntimeType::parse(&runtime).ok_or_else(|| {
                SandboxError::Config(format!("KEYBOX_RUNTIME: unknown runtime '{runtime}'"))
            })?;
        }
        if let Some(image) = lookup("KEYBOX_IMAGE").filter(|v| !v.trim().is_empty()) {
            self.image = image;
        }
        if let Some(root) = lookup("KEYBOX_WORKSPACE").filter(|v| !v.trim().is_empty()) {
            self.workspace_root = root;
        }
        if let Some(user) = lookup("KEYBOX_EXEC_USER") {
            self.exec_user = Some(user).filter(|u| !u.trim().is_empty());
        }
        Ok(())
    }

    /// Reject configurations the lifecycle manager cannot work with.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::Config("image must not be empty".to_string()));
        }
        if !self.workspace_root.starts_with('/') {
            return Err(SandboxError::Config(format!(
                "workspace_root must be absolute, got '{}'",
                self.workspace_root
            )));
        }
        if self.marker_dir.trim().is_empty() {
            return Err(SandboxError::Config(
                "marker_dir must not be empty".to_string(),
            ));
        }
        if self.scaffold_command.is_empty() {
            return Err(SandboxError::Config(
                "scaffold_command must not be empty".to_string(),
            ));
        }
        if self.keep_alive_command.is_empty() {
            return Err(SandboxError::Config(
                "keep_alive_command must not be empty".to_string(),
            ));
        }
        if self.poll_attempts == 0 || self.start_attempts == 0 {
            return Err(SandboxError::Config(
                "poll_attempts and start_attempts must be at least 1".to_string(),
            ));
        }
        for (field, secs) in [
            ("command_timeout_secs", self.command_timeout_secs),
            ("create_timeout_secs", self.create_timeout_secs),
            ("scaffold_timeout_secs", self.scaffold_timeout_secs),
        ] {
            if secs == 0 {
                return Err(SandboxError::Config(format!("{field} must be at least 1")));
            }
        }
        crate::naming::validate_prefix(&self.name_prefix)?;
        Ok(())
    }

    /// Absolute path of the scaffold marker inside the sandbox.
    pub fn marker_path(&self) -> String {
        format!(
            "{}/{}",
            self.workspace_root.trim_end_matches('/'),
            self.marker_dir.trim_matches('/')
        )
    }

    /// Timeout for ordinary runtime commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Timeout for sandbox creation.
    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    /// Timeout for the scaffold command.
    pub fn scaffold_timeout(&self) -> Duration {
        Duration::from_secs(self.scaffold_timeout_secs)
    }

    /// Whether scaffold stderr says the project already exists.
    pub fn is_already_exists(&self, stderr: &str) -> bool {
        let stderr = stderr.to_lowercase();
        self.already_exists_patterns
            .iter()
            .any(|p| !p.is_empty() && stderr.contains(&p.to_lowercase()))
    }
}

/// Sandbox runtime type.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntimeType {
    /// Auto-detect: Docker > Podman
    #[default]
    Auto,
    /// Docker CLI
    Docker,
    /// Podman CLI
    Podman,
}

impl SandboxRuntimeType {
    /// Parse a runtime name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "docker" => Some(Self::Docker),
            "podman" => Some(Self::Podman),
            _ => None,
        }
    }

    /// CLI binary for a concrete runtime.
    pub fn binary(&self) -> Option<&'static str> {
        match self {
            Self::Docker => Some("docker"),
            Self::Podman => Some("podman"),
            Self::Auto => None,
        }
    }
}

fn read_to_string(path: &Path) -> SandboxResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| SandboxError::Config(format!("cannot read {}: {e}", path.display())))
}
