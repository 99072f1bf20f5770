//! Error types for the vault.

use thiserror::Error;

/// Common error type for vault and share-link operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The caller presented no valid bearer credential.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The caller does not own the resource.
    ///
    /// The gateway reports this as `NotFound` for files so that existence
    /// of another owner's file is never revealed.
    #[error("access to {0} is forbidden")]
    Forbidden(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Wrong password or corrupted ciphertext. The two are never distinguished.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Share link is past its expiry time.
    #[error("share link has expired")]
    LinkExpired,

    /// Share link has no downloads left.
    #[error("share link download limit reached")]
    LinkExhausted,

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Upload exceeds the configured size limit (in bytes).
    #[error("upload exceeds the maximum size of {0} bytes")]
    TooLarge(u64),

    /// Blob storage failure (transient, safe to retry).
    #[error("storage error: {0}")]
    Storage(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the caller may retry the whole operation unchanged.
    ///
    /// Decryption failures are never retryable: the same password yields
    /// the same key and the same tag mismatch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::Storage(_) | VaultError::Database(_) | VaultError::Io(_)
        )
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Database(e.to_string())
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
