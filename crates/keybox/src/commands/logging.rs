//! Logging initialization and configuration.
//!
//! The server logs to stdout. One-shot commands print their results on
//! stdout, so their logs go to a file in the platform log directory.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Initialize logging based on verbosity and mode.
///
/// `RUST_LOG` takes precedence over the built-in filters. Returns the log
/// file path if logging to file.
pub fn init_logging(verbose: bool, server: bool) -> Option<PathBuf> {
    let filter = if verbose {
        "keybox=debug,keybox_sandbox=debug,keybox_server=debug,tower_http=debug"
    } else if server {
        // Include request spans from the trace layer
        "keybox=info,keybox_sandbox=info,keybox_server=info,tower_http=info"
    } else {
        "keybox=info,keybox_sandbox=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if server {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(true)
            .init();
        return None;
    }

    let log_dir = get_log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {e}");
        return None;
    }

    let log_file = log_dir.join("keybox.log");
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            return None;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(file)
        .init();

    Some(log_file)
}

/// Get the log directory path.
pub fn get_log_dir() -> PathBuf {
    // macOS: ~/Library/Logs/keybox
    // Linux: ~/.local/state/keybox/logs
    // Windows: %LOCALAPPDATA%/keybox/logs

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library/Logs/keybox");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(state_dir) = dirs::state_dir() {
            return state_dir.join("keybox/logs");
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".local/state/keybox/logs");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app) = dirs::data_local_dir() {
            return local_app.join("keybox/logs");
        }
    }

    PathBuf::from(".keybox/logs")
}
