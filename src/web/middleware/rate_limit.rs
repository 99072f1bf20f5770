//! Rate limiting middleware.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, RwLock},
    time::Duration,
};

use crate::web::error::ApiError;

/// Per-IP rate limiter using Governor.
pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

type LimiterMap = RwLock<HashMap<String, Arc<IpRateLimiter>>>;

/// State for rate limiting.
#[derive(Clone)]
pub struct RateLimitState {
    /// Per-IP rate limiters for anonymous share downloads.
    share_limiters: Arc<LimiterMap>,
    /// Per-IP rate limiters for general API.
    api_limiters: Arc<LimiterMap>,
    /// Share download rate limit (requests per minute).
    share_rate_limit: u32,
    /// API rate limit (requests per minute).
    api_rate_limit: u32,
}

impl RateLimitState {
    /// Create a new rate limit state.
    pub fn new(share_rate_limit: u32, api_rate_limit: u32) -> Self {
        Self {
            share_limiters: Arc::new(RwLock::new(HashMap::new())),
            api_limiters: Arc::new(RwLock::new(HashMap::new())),
            share_rate_limit,
            api_rate_limit,
        }
    }

    /// Get or create a rate limiter for the given IP.
    fn get_or_create_limiter(
        limiters: &LimiterMap,
        ip: &str,
        requests_per_minute: u32,
    ) -> Arc<IpRateLimiter> {
        {
            let read_guard = limiters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(limiter) = read_guard.get(ip) {
                return limiter.clone();
            }
        }

        let mut write_guard = limiters.write().unwrap_or_else(|e| e.into_inner());

        // Double-check after acquiring write lock
        if let Some(limiter) = write_guard.get(ip) {
            return limiter.clone();
        }

        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let limiter = Arc::new(RateLimiter::direct(quota));
        write_guard.insert(ip.to_string(), limiter.clone());
        limiter
    }

    /// Check if a share download is allowed.
    pub fn check_share_download(&self, ip: &str) -> bool {
        let limiter = Self::get_or_create_limiter(&self.share_limiters, ip, self.share_rate_limit);
        limiter.check().is_ok()
    }

    /// Check if a request is allowed for general API.
    pub fn check_api(&self, ip: &str) -> bool {
        let limiter = Self::get_or_create_limiter(&self.api_limiters, ip, self.api_rate_limit);
        limiter.check().is_ok()
    }

    /// Drop limiters that are not currently in use.
    pub fn cleanup(&self) {
        for limiters in [&self.share_limiters, &self.api_limiters] {
            let mut guard = limiters.write().unwrap_or_else(|e| e.into_inner());
            guard.retain(|_, v| Arc::strong_count(v) > 1);
        }
    }

    /// Start a background task to periodically clean up old entries.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                self.cleanup();
            }
        });
    }
}

/// Extract client IP from request.
fn get_client_ip(req: &Request<Body>) -> String {
    // Reverse proxy headers first
    if let Some(forwarded) = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(ip) = forwarded.split(',').next() {
            return ip.trim().to_string();
        }
    }

    if let Some(real_ip) = req
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
    {
        return real_ip.to_string();
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Rate limiting middleware for anonymous share downloads.
pub async fn share_download_rate_limit(
    state: Arc<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = get_client_ip(&req);

    if !state.check_share_download(&ip) {
        tracing::warn!(ip = %ip, "Share download rate limit exceeded");
        return ApiError::too_many_requests("Too many download attempts. Please try again later.")
            .into_response();
    }

    next.run(req).await
}

/// Rate limiting middleware for general API.
pub async fn api_rate_limit(
    state: Arc<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = get_client_ip(&req);

    if !state.check_api(&ip) {
        tracing::warn!(ip = %ip, "API rate limit exceeded");
        return ApiError::too_many_requests("Too many requests. Please try again later.")
            .into_response();
    }

    next.run(req).await
}
