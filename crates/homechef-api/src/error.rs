//! Error responses for the HTTP surface.
//!
//! Every error serializes as `{"error": "<kind>", "message": "<human>"}` with
//! the status code of the underlying [`IngressError`].

use axum::{
    extract::rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use homechef_delivery::IngressError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind.
    pub error: String,
    /// Human-readable description.
    pub message: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// Builds an error with an explicit status and kind.
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { error: kind.to_string(), message: message.into() } }
    }

    /// 400 with kind `validation_error`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    /// Maps a body that could not be buffered. Bodies over `max` bytes get the
    /// `payload_too_large` kind ingress uses.
    pub fn from_body_rejection(rejection: &BytesRejection, max: usize) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!(max, "request body over the payload limit");
            return Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                format!("payload exceeds the {max} byte limit"),
            );
        }
        Self::validation(rejection.body_text())
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<IngressError> for ApiError {
    fn from(err: IngressError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err, kind = err.kind(), "request failed");
        } else {
            warn!(error = %err, kind = err.kind(), "request rejected");
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
