//! Test helpers for Web API integration tests.
//!
//! Builds an in-process server over an in-memory database and a temporary
//! blob directory, and mints bearer tokens the way the account service would.

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tempfile::TempDir;

use filevault::config::WebConfig;
use filevault::crypto::KdfParams;
use filevault::web::handlers::AppState;
use filevault::web::middleware::{JwtClaims, JwtState, RateLimitState};
use filevault::web::router::create_router;
use filevault::{BlobStorage, Database, VaultStore};

/// Secret shared between the test server and [`token_for`].
pub const TEST_JWT_SECRET: &str = "test-secret-key-for-testing-only";

/// Largest upload accepted by the test server.
pub const TEST_MAX_UPLOAD: u64 = 1024 * 1024;

/// A running test server and the state behind it.
pub struct TestApp {
    pub server: TestServer,
    pub vault: VaultStore,
    // Keeps the blob directory alive for the duration of the test
    pub temp_dir: TempDir,
}

/// Create a test configuration.
pub fn create_test_config() -> WebConfig {
    WebConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        api_rate_limit: 10_000,
        share_download_rate_limit: 1_000,
        ..WebConfig::default()
    }
}

/// Create a test server with an in-memory database.
pub async fn create_test_app() -> TestApp {
    create_test_app_with_config(create_test_config()).await
}

/// Create a test server with a custom web configuration.
pub async fn create_test_app_with_config(config: WebConfig) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let db = Database::open_in_memory()
        .await
        .expect("Failed to create test database");
    let storage =
        BlobStorage::new(temp_dir.path().join("blobs")).expect("Failed to create blob storage");
    let vault = VaultStore::new(db, storage, KdfParams::for_testing())
        .with_max_upload_bytes(TEST_MAX_UPLOAD);

    let app_state = Arc::new(AppState::new(vault.clone()));
    let jwt_state = Arc::new(JwtState::new(&config.jwt_secret));
    let rate_limit_state = Arc::new(RateLimitState::new(
        config.share_download_rate_limit,
        config.api_rate_limit,
    ));

    let router = create_router(app_state, jwt_state, rate_limit_state, &config);
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        vault,
        temp_dir,
    }
}

/// Mint a valid access token for `owner_id`.
pub fn token_for(owner_id: i64) -> String {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = JwtClaims {
        sub: owner_id,
        email: Some(format!("owner{}@example.com", owner_id)),
        iat: now,
        exp: now + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode token")
}

/// `Authorization` header value for `owner_id`.
pub fn bearer(owner_id: i64) -> String {
    format!("Bearer {}", token_for(owner_id))
}

/// Multipart form in the order the web client sends it: file, then password.
pub fn upload_form(filename: &str, content: &[u8], password: &str) -> MultipartForm {
    MultipartForm::new()
        .add_part(
            "file",
            Part::bytes(content.to_vec())
                .file_name(filename.to_string())
                .mime_type("application/octet-stream"),
        )
        .add_text("password", password.to_string())
}

/// Upload a file as `owner_id` and return the response body.
pub async fn upload(
    server: &TestServer,
    owner_id: i64,
    filename: &str,
    content: &[u8],
    password: &str,
) -> Value {
    let response = server
        .post("/files/upload")
        .add_header(axum::http::header::AUTHORIZATION, bearer(owner_id))
        .multipart(upload_form(filename, content, password))
        .await;

    assert_eq!(
        response.status_code(),
        axum::http::StatusCode::CREATED,
        "upload failed: {}",
        response.text()
    );
    response.json::<Value>()
}

/// Create a share link as `owner_id` and return its token.
pub async fn create_share(server: &TestServer, owner_id: i64, body: Value) -> String {
    let response = server
        .post("/share")
        .add_header(axum::http::header::AUTHORIZATION, bearer(owner_id))
        .json(&body)
        .await;

    assert_eq!(
        response.status_code(),
        axum::http::StatusCode::CREATED,
        "share creation failed: {}",
        response.text()
    );
    response.json::<Value>()["token"]
        .as_str()
        .expect("token missing")
        .to_string()
}

/// A payload of `len` bytes that is not all one value.
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
