//! Router configuration for Web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_share, delete_file, download_file, download_share, health_check, list_file_shares,
    list_files, revoke_share, upload_file, AppState,
};
use super::middleware::{
    api_rate_limit, create_cors_layer, jwt_auth, share_download_rate_limit, JwtState,
    RateLimitState,
};
use crate::config::WebConfig;

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    rate_limit_state: Arc<RateLimitState>,
    config: &WebConfig,
) -> Router {
    let upload_limit = app_state.upload_body_limit();

    // Owner routes (bearer token required, checked by the AuthUser extractor)
    let file_routes = Router::new()
        .route(
            "/files/upload",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files", get(list_files))
        .route("/files/:id", delete(delete_file))
        .route("/files/:id/download", get(download_file))
        .route("/files/:id/shares", get(list_file_shares));

    let share_limiter = rate_limit_state.clone();
    let share_routes = Router::new()
        .route("/share", post(create_share))
        .route("/share/:token", delete(revoke_share))
        // Anonymous route: its own, stricter per-IP budget
        .route(
            "/share/:token/download",
            post(download_share).layer(middleware::from_fn(move |req, next| {
                let state = share_limiter.clone();
                share_download_rate_limit(state, req, next)
            })),
        );

    let jwt_state_for_middleware = jwt_state.clone();
    let api_limiter = rate_limit_state.clone();

    Router::new()
        .merge(file_routes)
        .merge(share_routes)
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.cors_origins))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_secs,
                )))
                .layer(middleware::from_fn(move |req, next| {
                    let state = api_limiter.clone();
                    api_rate_limit(state, req, next)
                }))
                .layer(middleware::from_fn(move |req, next| {
                    let state = jwt_state_for_middleware.clone();
                    jwt_auth(state, req, next)
                })),
        )
        .with_state(app_state)
}
