//! Workspace file command handlers.

use clap::Subcommand;
use keybox_sandbox::{LifecycleManager, SandboxConfig, WorkspaceFiles};
use std::process::ExitCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Files subcommands.
#[derive(Subcommand)]
pub enum FilesCommands {
    /// List workspace files, one per line
    Ls {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Print a workspace file
    Cat {
        /// Identity owning the sandbox
        identity: String,
        /// Path relative to the workspace root
        path: String,
    },
    /// Replace a workspace file with the content of stdin
    Write {
        /// Identity owning the sandbox
        identity: String,
        /// Path relative to the workspace root
        path: String,
    },
}

/// Handle files commands.
pub async fn handle_files(config: SandboxConfig, command: FilesCommands) -> anyhow::Result<ExitCode> {
    let manager = LifecycleManager::from_config(config).await?;
    let files = WorkspaceFiles::new(manager);

    match command {
        FilesCommands::Ls { identity } => {
            let mut listing = files.list_files(&identity).await?;
            listing.sort();
            for path in listing {
                println!("{path}");
            }
        }
        FilesCommands::Cat { identity, path } => {
            let content = files.read_file(&identity, &path).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&content).await?;
            stdout.flush().await?;
        }
        FilesCommands::Write { identity, path } => {
            let mut content = Vec::new();
            tokio::io::stdin().read_to_end(&mut content).await?;
            files.write_file(&identity, &path, &content).await?;
            eprintln!("Wrote {} bytes to {}", content.len(), path);
        }
    }

    Ok(ExitCode::SUCCESS)
}
