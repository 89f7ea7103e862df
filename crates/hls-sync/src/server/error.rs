use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::error::SyncError;

/// Plain-text error returned by the time-shift endpoint.
#[derive(Debug)]
pub struct TimeshiftError {
    pub status: StatusCode,
    pub message: String,
}

impl TimeshiftError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for TimeshiftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for TimeshiftError {}

impl From<SyncError> for TimeshiftError {
    fn from(err: SyncError) -> Self {
        Self::internal(format!("Build playlist failed: {err}"))
    }
}

impl IntoResponse for TimeshiftError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "Time-shift request failed");
        } else {
            debug!(status = %self.status, message = %self.message, "Rejected time-shift request");
        }
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}
