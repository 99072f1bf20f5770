//! Share link lifecycle.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use tokio::fs::File;
use tracing::{debug, info};

use super::link::{NewShareLink, ShareLink, ShareLinkRepository};
use crate::crypto::DecryptingReader;
use crate::datetime::{minutes_from_now_sql, now_sql};
use crate::logging::token_prefix;
use crate::vault::{FileRecord, VaultStore};
use crate::{Result, VaultError};

/// Random bytes per token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Longest accepted expiry (ten years).
pub const MAX_EXPIRY_MINUTES: i64 = 10 * 365 * 24 * 60;

/// A share download that has passed every check and been counted.
pub struct ShareDownload {
    /// The link after its counter was incremented.
    pub link: ShareLink,
    /// The shared file.
    pub record: FileRecord,
    /// Decryptor positioned at the start of the plaintext.
    pub reader: DecryptingReader<File>,
}

/// Issues, validates, consumes and revokes share links.
#[derive(Debug, Clone)]
pub struct ShareLinkManager {
    vault: VaultStore,
}

impl ShareLinkManager {
    /// Create a new manager backed by `vault`.
    pub fn new(vault: VaultStore) -> Self {
        Self { vault }
    }

    /// Generate a new unguessable token (43 URL-safe characters).
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Create a share link for a file owned by `owner_id`.
    ///
    /// `expires_in_minutes`: `None` never expires, `0` is already expired.
    /// `max_downloads`: `None` is unlimited.
    pub async fn create(
        &self,
        owner_id: i64,
        file_id: &str,
        expires_in_minutes: Option<i64>,
        max_downloads: Option<i64>,
    ) -> Result<ShareLink> {
        if let Some(minutes) = expires_in_minutes {
            if !(0..=MAX_EXPIRY_MINUTES).contains(&minutes) {
                return Err(VaultError::Validation(format!(
                    "expires_in_minutes must be between 0 and {MAX_EXPIRY_MINUTES}"
                )));
            }
        }
        if let Some(max) = max_downloads {
            if max < 1 {
                return Err(VaultError::Validation(
                    "max_downloads must be at least 1".to_string(),
                ));
            }
        }

        let record = self.vault.get_owned(owner_id, file_id).await?;

        let link = ShareLinkRepository::new(self.vault.db().pool())
            .create(&NewShareLink {
                token: Self::generate_token(),
                file_id: record.id,
                created_by: owner_id,
                expires_at: expires_in_minutes.map(minutes_from_now_sql),
                max_downloads,
            })
            .await?;

        info!(
            token = token_prefix(&link.token),
            file_id = %link.file_id,
            owner_id,
            "Share link created"
        );
        Ok(link)
    }

    /// Look up a live link.
    pub async fn resolve(&self, token: &str) -> Result<ShareLink> {
        let link = ShareLinkRepository::new(self.vault.db().pool())
            .get_by_token(token)
            .await?
            .ok_or_else(|| VaultError::NotFound("share link".to_string()))?;
        link.check_live(&now_sql())?;
        Ok(link)
    }

    /// Atomically check liveness and count one download.
    pub async fn consume(&self, token: &str) -> Result<ShareLink> {
        let repo = ShareLinkRepository::new(self.vault.db().pool());
        let now = now_sql();

        if let Some(link) = repo.consume(token, &now).await? {
            debug!(
                token = token_prefix(token),
                used = link.downloads_used,
                "Share link consumed"
            );
            return Ok(link);
        }

        // Nothing matched: classify why.
        let link = repo
            .get_by_token(token)
            .await?
            .ok_or_else(|| VaultError::NotFound("share link".to_string()))?;
        link.check_live(&now)?;
        Err(VaultError::LinkExhausted)
    }

    /// Delete a link created by `owner_id`.
    pub async fn revoke(&self, owner_id: i64, token: &str) -> Result<()> {
        let repo = ShareLinkRepository::new(self.vault.db().pool());
        let link = repo
            .get_by_token(token)
            .await?
            .ok_or_else(|| VaultError::NotFound("share link".to_string()))?;

        if link.created_by != owner_id {
            return Err(VaultError::Forbidden("share link".to_string()));
        }

        if !repo.delete(token).await? {
            return Err(VaultError::NotFound("share link".to_string()));
        }
        info!(token = token_prefix(token), owner_id, "Share link revoked");
        Ok(())
    }

    /// List the links of a file owned by `owner_id`.
    pub async fn list_for_file(&self, owner_id: i64, file_id: &str) -> Result<Vec<ShareLink>> {
        let record = self.vault.get_owned(owner_id, file_id).await?;
        ShareLinkRepository::new(self.vault.db().pool())
            .list_for_file(&record.id)
            .await
    }

    /// Open a shared file for an anonymous caller.
    ///
    /// Order: the link must be live, the password must authenticate the
    /// first chunk, and only then is a download counted. A wrong password
    /// therefore never uses up a download.
    ///
    /// If the file is deleted before the download is counted, its links are
    /// gone too and this fails with `NotFound` even when the blob was
    /// already open.
    pub async fn open_download(&self, token: &str, password: &str) -> Result<ShareDownload> {
        let link = self.resolve(token).await?;
        let record = self.vault.get_record(&link.file_id).await?;
        let reader = self.vault.open_decrypted(&record, password).await?;
        let link = self.consume(token).await?;

        info!(
            token = token_prefix(token),
            file_id = %record.id,
            used = link.downloads_used,
            "Share download started"
        );
        Ok(ShareDownload {
            link,
            record,
            reader,
        })
    }

    /// Delete expired and exhausted links.
    pub async fn cleanup(&self) -> Result<u64> {
        ShareLinkRepository::new(self.vault.db().pool())
            .cleanup_dead(&now_sql())
            .await
    }
}
