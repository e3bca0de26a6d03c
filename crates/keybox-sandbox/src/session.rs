//! Session routing.
//!
//! Turns the metadata of an inbound interactive connection into the sandbox
//! it targets and the workspace path to open. Parsing is pure: whether the
//! sandbox is actually running is checked by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key naming the target sandbox.
pub const SANDBOX_REF_KEY: &str = "sandboxRef";

/// Metadata key naming the workspace path.
pub const WORKSPACE_KEY: &str = "workspace";

/// A routed interactive session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Sandbox reference, trimmed
    pub sandbox_ref: String,
    /// Workspace path inside the sandbox
    pub workspace_path: String,
    pub established_at: DateTime<Utc>,
}

/// Parses session metadata.
#[derive(Debug, Clone)]
pub struct SessionRouter {
    default_workspace: String,
}

impl SessionRouter {
    pub fn new(default_workspace: impl Into<String>) -> Self {
        Self {
            default_workspace: default_workspace.into(),
        }
    }

    pub fn default_workspace(&self) -> &str {
        &self.default_workspace
    }

    /// Parse key/value metadata.
    ///
    /// Returns `None` when `sandboxRef` is missing or blank. A missing or
    /// blank `workspace` falls back to the default workspace root.
    pub fn parse(&self, metadata: &HashMap<String, String>) -> Option<Session> {
        let sandbox_ref = metadata
            .get(SANDBOX_REF_KEY)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())?;

        let workspace_path = metadata
            .get(WORKSPACE_KEY)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(self.default_workspace.as_str());

        Some(Session {
            sandbox_ref: sandbox_ref.to_string(),
            workspace_path: workspace_path.to_string(),
            established_at: Utc::now(),
        })
    }

    /// Parse a raw (already extracted) URL query string.
    pub fn parse_query(&self, query: &str) -> Option<Session> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let metadata: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        self.parse(&metadata)
    }

    /// Parse the query of a full connection URL.
    pub fn parse_url(&self, raw: &str) -> Option<Session> {
        let url = url::Url::parse(raw).ok()?;
        self.parse_query(url.query().unwrap_or_default())
    }
}

impl Default for SessionRouter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WORKSPACE_ROOT)
    }
}
