//! Per-identity sandbox lifecycle and session routing for keybox.
//!
//! Every end user (identified by a public key string) gets exactly one
//! container sandbox. This crate decides when that sandbox has to be
//! created, started, scaffolded or removed, exposes its workspace files and
//! routes interactive sessions to it:
//!
//! - **naming**: identity to deterministic sandbox name
//! - **exec**: one external command per call, always with a timeout
//! - **runtime**: Docker/Podman CLI behind the [`ContainerRuntime`] trait
//! - **lifecycle**: `ensure_ready`, `health_check`, `teardown`, `status`
//! - **files**: list, read and write workspace files
//! - **session**: parse inbound session metadata
//!
//! # Example
//!
//! ```rust,no_run
//! use keybox_sandbox::{LifecycleManager, SandboxConfig, WorkspaceFiles};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _sources) = SandboxConfig::load(None)?;
//!     let manager = LifecycleManager::from_config(config).await?;
//!     let identity = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";
//!
//!     // Create or repair the sandbox
//!     let report = manager.ensure_ready(identity).await?;
//!     assert!(report.ready);
//!
//!     // Edit a file in its workspace
//!     let files = WorkspaceFiles::new(manager.clone());
//!     files.write_file(identity, "notes.md", b"# hello\n").await?;
//!     println!("{:?}", files.list_files(identity).await?);
//!
//!     manager.teardown(identity).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod files;
pub mod lifecycle;
pub mod locks;
pub mod naming;
pub mod path;
pub mod runtime;
pub mod session;

pub use config::{SandboxConfig, SandboxRuntimeType, DEFAULT_IMAGE, DEFAULT_WORKSPACE_ROOT};
pub use error::{SandboxError, SandboxResult};
pub use exec::{CommandResult, CommandRunner, CommandSpec, ProcessRunner};
pub use files::WorkspaceFiles;
pub use lifecycle::{
    LifecycleAction, LifecycleManager, ReadyReport, SandboxStatusReport, TeardownReport,
};
pub use naming::{name_for, SandboxName};
pub use path::WorkspacePath;
pub use runtime::{ContainerRuntime, CreateSpec, ExecOptions, RuntimeState, StepOutcome};
pub use session::{Session, SessionRouter};
