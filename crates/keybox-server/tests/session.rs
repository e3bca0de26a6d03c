//! WebSocket session routing: everything decided before the upgrade.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ws::WebSocket,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use keybox_sandbox::{SandboxName, SandboxResult, Session};
use keybox_server::{create_router, AppState, SessionRelay};
use keybox_test_utils::fixtures::IDENTITY;
use keybox_test_utils::Harness;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Default)]
struct CountingRelay {
    sessions: AtomicUsize,
}

#[async_trait]
impl SessionRelay for CountingRelay {
    async fn relay(&self, _: WebSocket, _: SandboxName, _: Session) -> SandboxResult<()> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn app(h: &Harness) -> (Router, Arc<CountingRelay>) {
    let relay = Arc::new(CountingRelay::default());
    let app = create_router(AppState::new(h.manager.clone(), relay.clone()));
    (app, relay)
}

/// A WebSocket handshake request. No upgrade handle is attached, so a
/// request that passes routing stops at the upgrade itself.
async fn connect(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn error_kind(response: Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["kind"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_missing_sandbox_ref() {
    let h = Harness::new();
    let (app, relay) = app(&h);

    for uri in ["/session", "/session?workspace=/x", "/session?sandboxRef=%20%20"] {
        let response = connect(&app, uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(error_kind(response).await, "bad_request");
    }

    assert!(h.runtime.calls().is_empty());
    assert_eq!(relay.sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sandbox_not_running() {
    let h = Harness::new();
    let (app, relay) = app(&h);

    let response = connect(&app, &format!("/session?sandboxRef={IDENTITY}")).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_kind(response).await, "sandbox_not_running");
    assert!(h.runtime.mutations().is_empty());
    assert_eq!(relay.sessions.load(Ordering::SeqCst), 0);
}

/// A running sandbox passes routing, by identity or by runtime name.
#[tokio::test]
async fn test_ready_sandbox_passes_routing() {
    let h = Harness::new();
    h.manager.ensure_ready(IDENTITY).await.unwrap();
    let (app, _relay) = app(&h);
    let name = h.name(IDENTITY);

    for sandbox_ref in [IDENTITY, name.as_str()] {
        h.runtime.clear_calls();
        let uri = format!("/session?sandboxRef={sandbox_ref}&workspace=/workspace/contracts");

        let status = connect(&app, &uri).await.status();

        assert_ne!(status, StatusCode::BAD_REQUEST, "{sandbox_ref}");
        assert_ne!(status, StatusCode::CONFLICT, "{sandbox_ref}");
        assert_eq!(h.runtime.count("inspect"), 1);
        assert!(h.runtime.mutations().is_empty());
    }
}
