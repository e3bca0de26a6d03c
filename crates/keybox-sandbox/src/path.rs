//! Path handling for the sandbox workspace.
//!
//! Clients name files relative to the workspace root. Paths are normalized
//! and validated here, before any command reaches the sandbox.

use crate::error::{SandboxError, SandboxResult};

/// Resolves client-supplied file paths against a sandbox workspace root.
///
/// # Example
///
/// ```
/// use keybox_sandbox::WorkspacePath;
///
/// let workspace = WorkspacePath::new("/workspace");
///
/// assert_eq!(
///     workspace.resolve("contracts/hello/src/lib.rs").unwrap(),
///     "/workspace/contracts/hello/src/lib.rs"
/// );
/// assert_eq!(workspace.resolve("/Cargo.toml").unwrap(), "/workspace/Cargo.toml");
/// // An absolute path under the root is not joined twice.
/// assert_eq!(workspace.resolve("/workspace/Cargo.toml").unwrap(), "/workspace/Cargo.toml");
/// // Without the leading separator the root name is an ordinary directory.
/// assert_eq!(
///     workspace.resolve("workspace/Cargo.toml").unwrap(),
///     "/workspace/workspace/Cargo.toml"
/// );
/// assert!(workspace.resolve("../../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    /// Workspace root inside the sandbox (e.g., /workspace)
    root: String,
}

impl WorkspacePath {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    /// Get the workspace root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Normalize a client path to a path relative to the workspace root.
    ///
    /// Rules, in order:
    ///
    /// 1. Backslashes become `/`.
    /// 2. If the path starts with the absolute workspace root followed by `/`
    ///    (`/workspace/src/x`), that root is removed. Only the exact root
    ///    matches: `workspace/x` and `/workspaces/x` are kept, so a directory
    ///    named like the root stays reachable as `workspace/...`.
    /// 3. Leading separators are stripped and `.` or empty segments dropped.
    ///
    /// `..` segments, NUL bytes and paths that normalize to nothing
    /// (including the bare root) are rejected.
    pub fn normalize(&self, raw: &str) -> SandboxResult<String> {
        if raw.contains('\0') {
            return Err(SandboxError::InvalidPath(
                "path contains a NUL byte".to_string(),
            ));
        }

        let unified = raw.replace('\\', "/");
        let relative = self.strip_root(&unified);

        let mut segments = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(SandboxError::InvalidPath(format!(
                        "'{raw}' escapes the workspace"
                    )))
                }
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            return Err(SandboxError::InvalidPath(format!(
                "'{raw}' does not name a file"
            )));
        }

        Ok(segments.join("/"))
    }

    /// Normalize a client path and join it to the workspace root.
    ///
    /// See [`WorkspacePath::normalize`] for the accepted forms. `/x` and
    /// `<root>/x` both resolve to `<root>/x`.
    pub fn resolve(&self, raw: &str) -> SandboxResult<String> {
        let relative = self.normalize(raw)?;
        Ok(self.join(&relative))
    }

    /// Turn a listing entry (`./src/lib.rs` or `/workspace/src/lib.rs`) into
    /// a workspace-relative path.
    pub fn relativize(&self, entry: &str) -> Option<String> {
        let entry = entry.trim_end_matches('\r');
        let relative = entry.strip_prefix("./").unwrap_or(entry);
        let relative = self.strip_root(relative).trim_start_matches('/');
        (!relative.is_empty() && relative != ".").then(|| relative.to_string())
    }

    fn join(&self, relative: &str) -> String {
        if self.root == "/" {
            format!("/{relative}")
        } else {
            format!("{}/{relative}", self.root)
        }
    }

    fn strip_root<'a>(&self, path: &'a str) -> &'a str {
        if self.root == "/" {
            return path;
        }
        match path.strip_prefix(self.root.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

impl Default for WorkspacePath {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WORKSPACE_ROOT)
    }
}
