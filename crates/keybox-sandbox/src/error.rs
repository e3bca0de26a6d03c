//! Error types for sandbox operations.

use thiserror::Error;

/// Errors that can occur during sandbox operations.
///
/// "Not found" answers from the container runtime are never represented
/// here; they are folded into [`RuntimeState::Absent`](crate::RuntimeState)
/// by the runtime layer.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Identity string is empty or blank
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Workspace path was rejected before reaching the runtime
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Sandbox exists but is not running, or does not exist at all
    #[error("sandbox '{0}' is not running")]
    NotRunning(String),

    /// Create or scaffold step failed in a way retrying will not fix
    #[error("provisioning of '{name}' failed: {message}")]
    ProvisioningFailed { name: String, message: String },

    /// A command inside the sandbox exited non-zero or timed out
    #[error("{operation} failed: {message}")]
    IoFailure {
        operation: String,
        message: String,
        timed_out: bool,
    },

    /// File does not exist in the sandbox workspace
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The container runtime binary or daemon cannot be reached
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Create a provisioning failed error
    pub fn provisioning_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an I/O failure from a failed bridge call
    pub fn io_failure(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IoFailure {
            operation: operation.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create an I/O failure for a bridge call that hit its timeout
    pub fn io_timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::IoFailure {
            operation: operation.into(),
            message: format!("timed out after {timeout:?}"),
            timed_out: true,
        }
    }

    /// Create a runtime unavailable error
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::RuntimeUnavailable(message.into())
    }

    /// Check if this error indicates the sandbox is not running
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning(_))
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::IoFailure { timed_out: true, .. })
    }

    /// Whether the caller may simply retry later.
    ///
    /// Transient errors describe "not ready yet" conditions; everything else
    /// needs intervention (bad input, a broken image, a failing scaffold).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotRunning(_)
                | Self::RuntimeUnavailable(_)
                | Self::IoFailure {
                    timed_out: true,
                    ..
                }
        )
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::InvalidPath(_) => "invalid_path",
            Self::NotRunning(_) => "sandbox_not_running",
            Self::ProvisioningFailed { .. } => "provisioning_failed",
            Self::IoFailure { .. } => "io_failure",
            Self::FileNotFound(_) => "file_not_found",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
