//! API error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use keybox_sandbox::SandboxError;
use serde::Serialize;

/// Error body returned by every endpoint.
///
/// `retryable` tells clients whether the same request may succeed later
/// without any change on their side.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    kind: String,
    retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            kind: kind.into(),
            retryable: false,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        let status = match &err {
            SandboxError::InvalidIdentity(_) | SandboxError::InvalidPath(_) => {
                StatusCode::BAD_REQUEST
            }
            SandboxError::NotRunning(_) => StatusCode::CONFLICT,
            SandboxError::FileNotFound(_) => StatusCode::NOT_FOUND,
            SandboxError::RuntimeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SandboxError::IoFailure {
                timed_out: true, ..
            } => StatusCode::GATEWAY_TIMEOUT,
            SandboxError::IoFailure { .. } | SandboxError::ProvisioningFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            SandboxError::Config(_) | SandboxError::Io(_) | SandboxError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            error: err.to_string(),
            kind: err.kind().to_string(),
            retryable: err.is_transient(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
