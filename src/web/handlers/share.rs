//! Share link handlers for Web API.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use std::sync::Arc;

use crate::logging::token_prefix;
use crate::web::dto::{
    validation::parse_optional_json, CreateShareRequest, PasswordQuery, ShareLinkResponse,
    SharePasswordRequest, StatusResponse, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::file::{decrypted_file_response, require_password};
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;

/// POST /share - Create a share link for one of the caller's files.
pub async fn create_share(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateShareRequest>,
) -> Result<(StatusCode, Json<ShareLinkResponse>), ApiError> {
    let link = state
        .shares
        .create(
            auth.owner_id(),
            &req.file_id,
            req.expires_in_minutes,
            req.max_downloads,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ShareLinkResponse::from(link))))
}

/// DELETE /share/:token - Revoke a share link.
pub async fn revoke_share(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.shares.revoke(auth.owner_id(), &token).await?;
    Ok(Json(StatusResponse::deleted()))
}

/// POST /share/:token/download - Anonymous, password-gated download.
///
/// The password is read from the JSON body `{"password": "..."}` or, when
/// the body is empty, from `?password=`. Dead links are rejected before
/// any decryption, and a wrong password does not use up a download.
pub async fn download_share(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<PasswordQuery>,
    body: Bytes,
) -> Result<Response<Body>, ApiError> {
    let from_body = parse_optional_json::<SharePasswordRequest>(&body)?.map(|req| req.password);
    let password = require_password(from_body.or(query.password))?;

    let download = state
        .shares
        .open_download(&token, password.as_str())
        .await
        .inspect_err(|e| {
            tracing::info!(token = token_prefix(&token), error = %e, "Share download refused");
        })?;

    decrypted_file_response(&download.record, download.reader)
}
