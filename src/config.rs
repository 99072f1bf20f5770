//! Configuration module.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::crypto::KdfParams;
use crate::{Result, VaultError};

/// Web API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Host address to bind.
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Port number for the API.
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Secret used to verify bearer tokens (HS256).
    #[serde(default)]
    pub jwt_secret: String,
    /// Timeout for a request until its response head is produced.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Rate limit for all API endpoints (requests per minute per IP).
    #[serde(default = "default_api_rate_limit")]
    pub api_rate_limit: u32,
    /// Rate limit for anonymous share downloads (requests per minute per IP).
    #[serde(default = "default_share_download_rate_limit")]
    pub share_download_rate_limit: u32,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_api_rate_limit() -> u32 {
    300
}

fn default_share_download_rate_limit() -> u32 {
    10
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            cors_origins: vec![],
            jwt_secret: String::new(),
            request_timeout_secs: default_request_timeout(),
            api_rate_limit: default_api_rate_limit(),
            share_download_rate_limit: default_share_download_rate_limit(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/filevault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Ciphertext storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for ciphertext blobs.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Maximum plaintext upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
    /// Timeout for staging one upload's ciphertext.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
}

fn default_storage_path() -> String {
    "data/blobs".to_string()
}

fn default_max_upload_size() -> u64 {
    100
}

fn default_io_timeout() -> u64 {
    240
}

impl StorageConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    /// Upload staging timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_upload_size_mb: default_max_upload_size(),
            io_timeout_secs: default_io_timeout(),
        }
    }
}

/// Key derivation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB.
    #[serde(default = "default_kdf_memory")]
    pub kdf_memory_kib: u32,
    /// Argon2id iterations.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// Argon2id lanes.
    #[serde(default = "default_kdf_parallelism")]
    pub kdf_parallelism: u32,
}

fn default_kdf_memory() -> u32 {
    65536 // 64 MiB
}

fn default_kdf_iterations() -> u32 {
    3
}

fn default_kdf_parallelism() -> u32 {
    4
}

impl CryptoConfig {
    /// Key derivation parameters.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.kdf_memory_kib,
            time_cost: self.kdf_iterations,
            parallelism: self.kdf_parallelism,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_memory_kib: default_kdf_memory(),
            kdf_iterations: default_kdf_iterations(),
            kdf_parallelism: default_kdf_parallelism(),
        }
    }
}

/// Share-link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// Interval between purges of dead share links.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/filevault.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Web API configuration.
    #[serde(default)]
    pub web: WebConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ciphertext storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Key derivation configuration.
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// Share-link configuration.
    #[serde(default)]
    pub share: ShareConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| VaultError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FILEVAULT_JWT_SECRET`: Override the JWT secret key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jwt_secret) = std::env::var("FILEVAULT_JWT_SECRET") {
            if !jwt_secret.is_empty() {
                self.web.jwt_secret = jwt_secret;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.web.jwt_secret.is_empty() {
            return Err(VaultError::Config(
                "jwt_secret is not set. \
                 Set it in config.toml or via FILEVAULT_JWT_SECRET environment variable."
                    .to_string(),
            ));
        }
        // Blob writes must time out before the request does.
        if self.storage.io_timeout_secs >= self.web.request_timeout_secs {
            return Err(VaultError::Config(format!(
                "storage.io_timeout_secs ({}) must be shorter than web.request_timeout_secs ({})",
                self.storage.io_timeout_secs, self.web.request_timeout_secs
            )));
        }
        if self.storage.max_upload_size_mb == 0 {
            return Err(VaultError::Config(
                "storage.max_upload_size_mb must be positive".to_string(),
            ));
        }
        self.crypto.kdf_params().validate()?;
        Ok(())
    }
}
