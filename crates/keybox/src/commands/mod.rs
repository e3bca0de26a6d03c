//! Command handlers for the keybox CLI.

pub mod config;
pub mod files;
pub mod logging;
pub mod sandbox;
pub mod serve;

pub use config::*;
pub use files::*;
pub use logging::*;
pub use sandbox::*;
pub use serve::*;
