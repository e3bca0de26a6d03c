//! keybox - per-identity development sandboxes.
//!
//! This is the main entry point for the keybox CLI.

mod commands;

use clap::{Parser, Subcommand};
use commands::*;
use keybox_sandbox::SandboxConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "keybox")]
#[command(author, version, about = "Per-identity development sandboxes", long_about = None)]
struct Cli {
    /// Config file layered over the global config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:3000")]
        address: SocketAddr,
    },
    /// Bring an identity's sandbox up and scaffold its workspace
    Ensure {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Check whether an identity's sandbox is running
    Health {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Show runtime state and workspace readiness
    Status {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Stop and remove an identity's sandbox
    Teardown {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Print the sandbox name derived for an identity
    Name {
        /// Identity owning the sandbox
        identity: String,
    },
    /// Workspace file operations
    Files {
        #[command(subcommand)]
        command: FilesCommands,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let server = matches!(cli.command, Commands::Serve { .. });
    if let Some(path) = init_logging(cli.verbose, server) {
        tracing::debug!(path = %path.display(), "Logging to file");
    }

    let (config, sources) = SandboxConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { address } => run_server(config, address).await,
        Commands::Ensure { identity } => handle_ensure(config, &identity).await,
        Commands::Health { identity } => handle_health(config, &identity).await,
        Commands::Status { identity } => handle_status(config, &identity).await,
        Commands::Teardown { identity } => handle_teardown(config, &identity).await,
        Commands::Name { identity } => show_name(&config, &identity),
        Commands::Files { command } => handle_files(config, command).await,
        Commands::Config => show_config(&config, &sources),
    }
}
