//! HTTP routes for the server.

use crate::{error::ApiError, state::AppState, ws::session_handler};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use keybox_sandbox::{ReadyReport, SandboxStatusReport, TeardownReport};
use serde::Deserialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // ===================
        // Lifecycle endpoints
        // ===================
        .route("/sandbox/{identity}", delete(teardown))
        .route("/sandbox/{identity}/ensure", post(ensure))
        .route("/sandbox/{identity}/health", get(sandbox_health))
        .route("/sandbox/{identity}/status", get(status))
        // ===================
        // File endpoints
        // ===================
        .route("/sandbox/{identity}/files", get(list_files))
        .route("/sandbox/{identity}/file", get(read_file).put(write_file))
        // ===================
        // Interactive sessions
        // ===================
        .route("/session", get(session_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
}

/// Health check endpoint.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "runtime": state.manager.runtime().runtime_type(),
    }))
}

/// Bring a sandbox up. Answers 202 when it did not reach running in time.
async fn ensure(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<(StatusCode, Json<ReadyReport>), ApiError> {
    let report = state.manager.ensure_ready(&identity).await?;
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(report)))
}

async fn sandbox_health(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let running = state.manager.health_check(&identity).await?;
    Ok(Json(serde_json::json!({ "running": running })))
}

async fn status(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<SandboxStatusReport>, ApiError> {
    Ok(Json(state.manager.status(&identity).await?))
}

async fn teardown(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<TeardownReport>, ApiError> {
    let report = state.manager.teardown(&identity).await?;
    info!(name = %report.name, deleted = report.deleted, "Teardown requested over HTTP");
    Ok(Json(report))
}

async fn list_files(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let files = state.files.list_files(&identity).await?;
    Ok(Json(serde_json::json!({ "files": files })))
}

async fn read_file(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let content = state.files.read_file(&identity, &query.path).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        content,
    ))
}

async fn write_file(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state
        .files
        .write_file(&identity, &query.path, &body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
