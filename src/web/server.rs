//! Web server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::{ShareConfig, WebConfig};
use crate::share::ShareLinkManager;
use crate::vault::VaultStore;
use crate::{Result, VaultError};

use super::handlers::AppState;
use super::middleware::{JwtState, RateLimitState};
use super::router::create_router;

/// Web server for the vault API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// JWT state.
    jwt_state: Arc<JwtState>,
    /// Per-IP rate limiters.
    rate_limit_state: Arc<RateLimitState>,
    /// Web configuration.
    web_config: WebConfig,
    /// Interval between dead share link purges.
    cleanup_interval: Duration,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &WebConfig, share_config: &ShareConfig, vault: VaultStore) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| VaultError::Config(format!("invalid web server address: {e}")))?;

        let rate_limit_state = Arc::new(RateLimitState::new(
            config.share_download_rate_limit,
            config.api_rate_limit,
        ));

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(vault)),
            jwt_state: Arc::new(JwtState::new(&config.jwt_secret)),
            rate_limit_state,
            web_config: config.clone(),
            cleanup_interval: Duration::from_secs(share_config.cleanup_interval_secs.max(1)),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the background task that purges dead share links.
    ///
    /// Expired and exhausted links can never be used again; removing them
    /// keeps the table small.
    fn start_share_cleanup_task(shares: ShareLinkManager, every: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                match shares.cleanup().await {
                    Ok(count) if count > 0 => {
                        tracing::info!(deleted_count = count, "Cleaned up dead share links");
                    }
                    Ok(_) => tracing::debug!("No dead share links to clean up"),
                    Err(e) => tracing::warn!(error = %e, "Failed to cleanup share links"),
                }
            }
        });
    }

    async fn bind(self) -> std::io::Result<(TcpListener, axum::Router)> {
        let shares = self.app_state.shares.clone();

        let router = create_router(
            self.app_state,
            self.jwt_state,
            self.rate_limit_state.clone(),
            &self.web_config,
        );

        let listener = TcpListener::bind(self.addr).await?;

        // Background tasks start only after a successful bind
        Self::start_share_cleanup_task(shares, self.cleanup_interval);
        self.rate_limit_state.start_cleanup_task();
        tracing::info!(
            every_secs = self.cleanup_interval.as_secs(),
            "Share link cleanup task started"
        );

        Ok((listener, router))
    }

    /// Run the web server.
    pub async fn run(self) -> std::io::Result<()> {
        let (listener, router) = self.bind().await?;
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::io::Result<SocketAddr> {
        let (listener, router) = self.bind().await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Web server listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::db::Database;
    use crate::vault::BlobStorage;
    use tempfile::TempDir;

    fn create_test_config() -> WebConfig {
        WebConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Use random port
            jwt_secret: "test-secret-key".to_string(),
            ..WebConfig::default()
        }
    }

    async fn create_vault(temp_dir: &TempDir) -> VaultStore {
        let db = Database::open_in_memory().await.unwrap();
        let storage = BlobStorage::new(temp_dir.path().join("blobs")).unwrap();
        VaultStore::new(db, storage, KdfParams::for_testing())
    }

    #[tokio::test]
    async fn test_web_server_new() {
        let temp_dir = TempDir::new().unwrap();
        let vault = create_vault(&temp_dir).await;

        let server = WebServer::new(&create_test_config(), &ShareConfig::default(), vault).unwrap();
        assert_eq!(server.addr().ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_web_server_invalid_address() {
        let temp_dir = TempDir::new().unwrap();
        let vault = create_vault(&temp_dir).await;

        let mut config = create_test_config();
        config.host = "not an address".to_string();
        assert!(matches!(
            WebServer::new(&config, &ShareConfig::default(), vault),
            Err(VaultError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_web_server_run() {
        let temp_dir = TempDir::new().unwrap();
        let vault = create_vault(&temp_dir).await;

        let server = WebServer::new(&create_test_config(), &ShareConfig::default(), vault).unwrap();
        let addr = server.run_with_addr().await.unwrap();

        let client = reqwest::Client::new();
        let resp = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        let body: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
        assert_eq!(body["status"], "ok");
    }
}
