//! Server state.

use crate::relay::SessionRelay;
use keybox_sandbox::{LifecycleManager, SessionRouter, WorkspaceFiles};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: LifecycleManager,
    pub files: WorkspaceFiles,
    pub router: SessionRouter,
    /// Where upgraded sessions are handed off
    pub relay: Arc<dyn SessionRelay>,
}

impl AppState {
    /// Build the state around one lifecycle manager.
    ///
    /// Sessions that omit a workspace open the manager's workspace root.
    pub fn new(manager: LifecycleManager, relay: Arc<dyn SessionRelay>) -> Self {
        let router = SessionRouter::new(manager.workspace().root());
        Self {
            files: WorkspaceFiles::new(manager.clone()),
            manager,
            router,
            relay,
        }
    }
}
