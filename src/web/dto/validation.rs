//! Validation utilities for Web API DTOs.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::web::error::ApiError;

/// A JSON extractor that validates the request body.
///
/// Malformed JSON is a 400 `BAD_REQUEST`; a body that parses but fails
/// validation is a 400 `VALIDATION_ERROR` with per-field `details`.
///
/// ```ignore
/// async fn create_share(
///     ValidatedJson(req): ValidatedJson<CreateShareRequest>,
/// ) -> Result<Json<ShareLinkResponse>, ApiError> {
///     // req is already validated
/// }
/// ```
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;

        value.validate().map_err(ApiError::from_validation_errors)?;

        Ok(ValidatedJson(value))
    }
}

/// Parse and validate an optional JSON body.
///
/// An empty body yields `None` so the caller can fall back to another source.
pub fn parse_optional_json<T>(body: &[u8]) -> Result<Option<T>, ApiError>
where
    T: DeserializeOwned + Validate,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: T = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e)))?;
    value.validate().map_err(ApiError::from_validation_errors)?;
    Ok(Some(value))
}

/// Validate that a string does not contain control characters or NULL bytes.
pub fn no_control_chars(value: &str) -> Result<(), validator::ValidationError> {
    if value.chars().any(char::is_control) {
        return Err(validator::ValidationError::new("no_control_chars")
            .with_message("Must not contain control characters".into()));
    }
    Ok(())
}
