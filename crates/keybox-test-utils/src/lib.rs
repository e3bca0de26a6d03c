//! Testing utilities, fixtures, and mocks for keybox.
//!
//! This crate provides common testing infrastructure used across the keybox workspace:
//!
//! - **Sandbox**: In-memory container runtime for testing without Docker or Podman
//! - **Mocks**: Scripted command runner for testing the CLI runtime
//! - **Fixtures**: Fast-polling config, sample identities and a wired-up harness
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use keybox_test_utils::{fixtures::IDENTITY, Harness};
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let harness = Harness::new();
//!     harness.manager.ensure_ready(IDENTITY).await.unwrap();
//!
//!     harness.files.write_file(IDENTITY, "a.txt", b"hi").await.unwrap();
//!     assert_eq!(harness.files.read_file(IDENTITY, "a.txt").await.unwrap(), b"hi");
//! }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod sandbox;

// Re-export commonly used items
pub use fixtures::{test_config, Harness};
pub use mocks::ScriptedRunner;
pub use sandbox::{FakeRuntime, RuntimeCall, ScaffoldBehavior};
