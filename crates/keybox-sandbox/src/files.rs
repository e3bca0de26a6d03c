//! Workspace file bridge.
//!
//! Lists, reads and writes files inside a sandbox's workspace. Every call
//! holds the sandbox's lock in shared mode and requires a running sandbox;
//! nothing here ever provisions or repairs one.

use crate::error::{SandboxError, SandboxResult};
use crate::lifecycle::LifecycleManager;
use crate::locks::SharedGuard;
use crate::naming::SandboxName;
use tracing::debug;

/// Argument vectors for the commands the bridge runs inside a sandbox.
///
/// Paths travel as discrete arguments and file content through stdin.
pub mod argv {
    /// Script for [`write_file`]; the target path arrives as `$1`.
    pub const WRITE_SCRIPT: &str = "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"";

    /// Print a file.
    pub fn read_file(path: &str) -> Vec<String> {
        vec!["cat".to_string(), "--".to_string(), path.to_string()]
    }

    /// Replace a file with stdin, creating parent directories.
    pub fn write_file(path: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            WRITE_SCRIPT.to_string(),
            "sh".to_string(),
            path.to_string(),
        ]
    }

    /// NUL-separated list of regular files under the working directory,
    /// pruning directories named in `exclude`.
    pub fn list_files(exclude: &[String]) -> Vec<String> {
        let mut argv = vec!["find".to_string(), ".".to_string()];
        let names: Vec<&String> = exclude.iter().filter(|d| !d.is_empty()).collect();

        if !names.is_empty() {
            argv.extend(["-type", "d", "("].map(String::from));
            for (i, name) in names.iter().enumerate() {
                if i > 0 {
                    argv.push("-o".to_string());
                }
                argv.push("-name".to_string());
                argv.push((*name).clone());
            }
            argv.extend([")", "-prune", "-o"].map(String::from));
        }

        argv.extend(["-type", "f", "-print0"].map(String::from));
        argv
    }

    /// Exit 0 if `path` is a directory, 1 otherwise.
    pub fn is_dir(path: &str) -> Vec<String> {
        vec!["test".to_string(), "-d".to_string(), path.to_string()]
    }

    /// Create a directory and its parents.
    pub fn make_dir(path: &str) -> Vec<String> {
        vec!["mkdir".to_string(), "-p".to_string(), path.to_string()]
    }
}

/// stderr fragments of a read on a missing file.
const MISSING_FILE_SIGNATURES: &[&str] = &["no such file"];

/// stderr fragments of the runtime failing to enter the exec workdir. These
/// also say "no such file", so they are checked first.
const MISSING_WORKDIR_SIGNATURES: &[&str] = &["chdir to cwd", "chdir to `"];

/// File access to sandbox workspaces.
#[derive(Clone)]
pub struct WorkspaceFiles {
    manager: LifecycleManager,
}

impl WorkspaceFiles {
    pub fn new(manager: LifecycleManager) -> Self {
        Self { manager }
    }

    /// List regular files in the workspace, relative to its root.
    ///
    /// Order is unspecified.
    pub async fn list_files(&self, identity: &str) -> SandboxResult<Vec<String>> {
        let (name, _guard) = self.ready(identity).await?;
        let config = self.manager.config();
        let timeout = config.command_timeout();
        let workspace = self.manager.workspace();

        let result = self
            .manager
            .runtime()
            .exec(
                &name,
                &argv::list_files(&config.list_exclude_dirs),
                self.manager
                    .exec_options(timeout)
                    .workdir(workspace.root()),
            )
            .await?;

        if result.timed_out {
            return Err(SandboxError::io_timeout("list_files", timeout));
        }
        if !result.is_success() {
            return Err(SandboxError::io_failure(
                "list_files",
                result.failure_message(),
            ));
        }

        let files: Vec<String> = result
            .stdout_text()
            .split('\0')
            .filter_map(|entry| workspace.relativize(entry))
            .collect();
        debug!(name = %name, count = files.len(), "Listed workspace files");
        Ok(files)
    }

    /// Read a workspace file.
    ///
    /// `path` is relative to the workspace root; a leading `/` or the absolute
    /// root itself is accepted (see [`WorkspacePath::normalize`](crate::path::WorkspacePath::normalize)).
    pub async fn read_file(&self, identity: &str, path: &str) -> SandboxResult<Vec<u8>> {
        let relative = self.manager.workspace().normalize(path)?;
        let (name, _guard) = self.ready(identity).await?;
        let timeout = self.manager.config().command_timeout();
        let absolute = self.manager.workspace().resolve(&relative)?;

        let result = self
            .manager
            .runtime()
            .exec(
                &name,
                &argv::read_file(&absolute),
                self.manager
                    .exec_options(timeout)
                    .workdir(self.manager.workspace().root()),
            )
            .await?;

        if result.timed_out {
            return Err(SandboxError::io_timeout("read_file", timeout));
        }
        if !result.is_success() {
            let stderr = result.stderr.to_lowercase();
            if MISSING_WORKDIR_SIGNATURES.iter().any(|s| stderr.contains(s)) {
                return Err(SandboxError::io_failure(
                    "read_file",
                    format!(
                        "workspace {} is missing: {}",
                        self.manager.workspace().root(),
                        result.failure_message()
                    ),
                ));
            }
            if MISSING_FILE_SIGNATURES.iter().any(|s| stderr.contains(s)) {
                return Err(SandboxError::FileNotFound(relative));
            }
            return Err(SandboxError::io_failure(
                "read_file",
                result.failure_message(),
            ));
        }

        debug!(name = %name, path = %relative, bytes = result.stdout.len(), "Read workspace file");
        Ok(result.stdout)
    }

    /// Replace a workspace file, creating parent directories as needed.
    ///
    /// `path` follows the same rules as [`WorkspaceFiles::read_file`].
    pub async fn write_file(&self, identity: &str, path: &str, content: &[u8]) -> SandboxResult<()> {
        let relative = self.manager.workspace().normalize(path)?;
        let (name, _guard) = self.ready(identity).await?;
        let timeout = self.manager.config().command_timeout();
        let absolute = self.manager.workspace().resolve(&relative)?;

        let result = self
            .manager
            .runtime()
            .exec(
                &name,
                &argv::write_file(&absolute),
                self.manager
                    .exec_options(timeout)
                    .workdir(self.manager.workspace().root())
                    .stdin(content),
            )
            .await?;

        if result.timed_out {
            return Err(SandboxError::io_timeout("write_file", timeout));
        }
        if !result.is_success() {
            return Err(SandboxError::io_failure(
                "write_file",
                result.failure_message(),
            ));
        }

        debug!(name = %name, path = %relative, bytes = content.len(), "Wrote workspace file");
        Ok(())
    }

    /// Take the shared lock, then check the sandbox is running.
    async fn ready(&self, identity: &str) -> SandboxResult<(SandboxName, SharedGuard)> {
        let name = self.manager.name_for(identity)?;
        let guard = self.manager.lock_shared(&name).await;
        self.manager.require_ready_name(&name).await?;
        Ok((name, guard))
    }
}
