//! Share link entity and repository.

use crate::db::DbPool;
use crate::{Result, VaultError};

/// A share link granting anonymous, password-gated access to one file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShareLink {
    /// Opaque capability token.
    pub token: String,
    /// Shared file ID.
    pub file_id: String,
    /// Owner who created the link.
    pub created_by: i64,
    /// Expiry timestamp (None = never expires).
    pub expires_at: Option<String>,
    /// Download cap (None = unlimited).
    pub max_downloads: Option<i64>,
    /// Successful downloads so far.
    pub downloads_used: i64,
    /// Creation timestamp.
    pub created_at: String,
}

impl ShareLink {
    /// Check whether the link is past its expiry at `now` (SQL datetime format).
    pub fn is_expired_at(&self, now: &str) -> bool {
        self.expires_at
            .as_deref()
            .is_some_and(|expires_at| expires_at <= now)
    }

    /// Check whether the download cap has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_downloads
            .is_some_and(|max| self.downloads_used >= max)
    }

    /// Check liveness, reporting why a dead link is dead.
    ///
    /// Expiry is reported before exhaustion.
    pub fn check_live(&self, now: &str) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(VaultError::LinkExpired);
        }
        if self.is_exhausted() {
            return Err(VaultError::LinkExhausted);
        }
        Ok(())
    }

    /// Downloads left, if capped.
    pub fn remaining_downloads(&self) -> Option<i64> {
        self.max_downloads
            .map(|max| (max - self.downloads_used).max(0))
    }
}

/// New share link for creation.
#[derive(Debug, Clone)]
pub struct NewShareLink {
    pub token: String,
    pub file_id: String,
    pub created_by: i64,
    pub expires_at: Option<String>,
    pub max_downloads: Option<i64>,
}

const LINK_COLUMNS: &str =
    "token, file_id, created_by, expires_at, max_downloads, downloads_used, created_at";

/// Repository for share link operations.
pub struct ShareLinkRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ShareLinkRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new share link.
    pub async fn create(&self, link: &NewShareLink) -> Result<ShareLink> {
        let sql = format!(
            "INSERT INTO share_links (token, file_id, created_by, expires_at, max_downloads)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {LINK_COLUMNS}"
        );
        sqlx::query_as::<_, ShareLink>(&sql)
            .bind(&link.token)
            .bind(&link.file_id)
            .bind(link.created_by)
            .bind(&link.expires_at)
            .bind(link.max_downloads)
            .fetch_one(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Get a share link by token.
    pub async fn get_by_token(&self, token: &str) -> Result<Option<ShareLink>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM share_links WHERE token = $1");
        sqlx::query_as::<_, ShareLink>(&sql)
            .bind(token)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Count one download against a live link, atomically.
    ///
    /// The liveness check and the increment are one statement, so concurrent
    /// callers can never push `downloads_used` past `max_downloads`.
    /// Returns the updated link, or `None` if the link is missing or dead.
    pub async fn consume(&self, token: &str, now: &str) -> Result<Option<ShareLink>> {
        let sql = format!(
            "UPDATE share_links
             SET downloads_used = downloads_used + 1
             WHERE token = $1
               AND (expires_at IS NULL OR expires_at > $2)
               AND (max_downloads IS NULL OR downloads_used < max_downloads)
             RETURNING {LINK_COLUMNS}"
        );
        sqlx::query_as::<_, ShareLink>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Delete a share link.
    ///
    /// Returns `true` if a link was deleted.
    pub async fn delete(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM share_links WHERE token = $1")
            .bind(token)
            .execute(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// List the links of a file, newest first.
    pub async fn list_for_file(&self, file_id: &str) -> Result<Vec<ShareLink>> {
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE file_id = $1
             ORDER BY created_at DESC, rowid DESC"
        );
        sqlx::query_as::<_, ShareLink>(&sql)
            .bind(file_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Delete expired and exhausted links (cleanup).
    pub async fn cleanup_dead(&self, now: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM share_links
             WHERE (expires_at IS NOT NULL AND expires_at <= $1)
                OR (max_downloads IS NOT NULL AND downloads_used >= max_downloads)",
        )
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
