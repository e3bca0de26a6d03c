//! HTTP server for keybox.
//!
//! Exposes sandbox lifecycle and workspace file operations as a REST API,
//! and routes interactive WebSocket sessions to a running sandbox.

pub mod error;
pub mod relay;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use relay::{ExecRelay, SessionRelay};
pub use routes::create_router;
pub use state::AppState;
