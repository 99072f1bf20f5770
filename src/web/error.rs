//! API error handling.
//!
//! Every error response has the body `{"error": "<message>", "code": "<CODE>"}`,
//! with a `details` object added for field-level validation failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::VaultError;

/// API error codes.
///
/// Codes are stable; clients branch on them rather than on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request (400).
    BadRequest,
    /// Invalid field values (400).
    ValidationError,
    /// Missing or invalid bearer token (401).
    Unauthorized,
    /// Wrong password or corrupted file (401).
    DecryptionFailed,
    /// Caller may not act on the resource (403).
    Forbidden,
    /// Not found (404).
    NotFound,
    /// Share link past its expiry (410).
    LinkExpired,
    /// Share link download cap reached (410).
    LinkExhausted,
    /// Upload too large (413).
    PayloadTooLarge,
    /// Rate limit exceeded (429).
    TooManyRequests,
    /// Internal server error (500).
    InternalError,
    /// Transient storage failure, safe to retry (503).
    StorageUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized | ErrorCode::DecryptionFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::LinkExpired | ErrorCode::LinkExhausted => StatusCode::GONE,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Error code.
    pub code: ErrorCode,
    /// Field-level validation error details (only present for validation errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Option<HashMap<String, Vec<String>>>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with field-level details.
    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a payload too large error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PayloadTooLarge, message)
    }

    /// Create a rate limit error.
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    /// Create an internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a validation error with a single message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a validation error from validator::ValidationErrors.
    pub fn from_validation_errors(errors: validator::ValidationErrors) -> Self {
        let mut details: HashMap<String, Vec<String>> = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let messages: Vec<String> = field_errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value for {}", field))
                })
                .collect();
            details.insert(field.to_string(), messages);
        }

        Self::with_details(ErrorCode::ValidationError, "Validation failed", details)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            details: self.details,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match &err {
            VaultError::AuthenticationRequired => ApiError::unauthorized("Authentication required"),
            // Another owner's file looks exactly like a missing one.
            VaultError::Forbidden(resource) if resource == "file" => {
                ApiError::not_found("File not found")
            }
            VaultError::Forbidden(_) => ApiError::forbidden("Access denied"),
            VaultError::NotFound(resource) => {
                ApiError::not_found(format!("{} not found", capitalize(resource)))
            }
            VaultError::DecryptionFailed => ApiError::new(
                ErrorCode::DecryptionFailed,
                "Invalid password or corrupted file",
            ),
            VaultError::LinkExpired => {
                ApiError::new(ErrorCode::LinkExpired, "Share link has expired")
            }
            VaultError::LinkExhausted => ApiError::new(
                ErrorCode::LinkExhausted,
                "Share link download limit reached",
            ),
            VaultError::Validation(msg) => ApiError::validation(msg.clone()),
            VaultError::TooLarge(limit) => ApiError::payload_too_large(format!(
                "File exceeds the maximum size of {} bytes",
                limit
            )),
            VaultError::Storage(_) | VaultError::Database(_) | VaultError::Io(_) => {
                tracing::error!(error = %err, "Storage failure");
                ApiError::new(
                    ErrorCode::StorageUnavailable,
                    "Storage temporarily unavailable, please retry",
                )
            }
            VaultError::Config(_) | VaultError::Internal(_) => {
                tracing::error!("Internal error: {}", err);
                ApiError::internal("An internal error occurred")
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
