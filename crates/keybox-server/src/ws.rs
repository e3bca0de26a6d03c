//! WebSocket session endpoint.
//!
//! The connection query carries the session metadata. Routing and the
//! readiness check happen before the upgrade, so a client that targets a
//! missing or stopped sandbox gets a plain HTTP error instead of a socket
//! that closes straight away.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        RawQuery, State,
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /session?sandboxRef=...&workspace=...`
pub async fn session_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(session) = query
        .as_deref()
        .and_then(|query| state.router.parse_query(query))
    else {
        return ApiError::bad_request("session requires a sandboxRef").into_response();
    };

    let name = match state.manager.resolve_ref(&session.sandbox_ref) {
        Ok(name) => name,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if let Err(e) = state.manager.require_ready_name(&name).await {
        debug!(name = %name, error = %e, "Session rejected");
        return ApiError::from(e).into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(name = %name, workspace = %session.workspace_path, "Session established");
    let relay = Arc::clone(&state.relay);
    ws.on_upgrade(move |socket| async move {
        let label = name.clone();
        if let Err(e) = relay.relay(socket, name, session).await {
            warn!(name = %label, error = %e, "Session relay failed");
        }
    })
}
