//! Error handling utilities for route handlers

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// A status code paired with a human-readable message, rendered as a JSON
/// `{"error": ...}` body. Pipeline failures surface through this so callers
/// never see a bare status when a more specific cause is known.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        let message = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        Self { status, message }
    }
}

/// Extension trait for logging errors and converting to response errors
pub trait LogErr<T> {
    /// Log error with context and return an ApiError carrying the context
    /// as the user-facing message (the raw error stays in the log)
    fn log_internal(self, context: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_internal(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            eprintln!("{}: {}", context, e);
            ApiError::internal(context)
        })
    }
}
