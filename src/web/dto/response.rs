//! Response DTOs for Web API.

use serde::Serialize;

use crate::datetime::to_rfc3339;
use crate::share::ShareLink;
use crate::vault::FileRecord;

/// File metadata returned by upload and list.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    /// File ID.
    pub id: String,
    /// Original filename.
    pub filename: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// Upload time (RFC 3339).
    pub created_at: String,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            created_at: to_rfc3339(&record.created_at),
            id: record.id,
            filename: record.filename,
            size: record.size,
        }
    }
}

/// Share link details.
#[derive(Debug, Serialize)]
pub struct ShareLinkResponse {
    /// Capability token.
    pub token: String,
    /// Path of the anonymous download endpoint.
    pub url: String,
    /// Shared file ID.
    pub file_id: String,
    /// Expiry time (RFC 3339), if any.
    pub expires_at: Option<String>,
    /// Download cap, if any.
    pub max_downloads: Option<i64>,
    /// Successful downloads so far.
    pub downloads_used: i64,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

impl From<ShareLink> for ShareLinkResponse {
    fn from(link: ShareLink) -> Self {
        Self {
            url: format!("/share/{}/download", link.token),
            expires_at: link.expires_at.as_deref().map(to_rfc3339),
            created_at: to_rfc3339(&link.created_at),
            token: link.token,
            file_id: link.file_id,
            max_downloads: link.max_downloads,
            downloads_used: link.downloads_used,
        }
    }
}

/// Simple status body for deletions.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    /// `{"status": "deleted"}`.
    pub fn deleted() -> Self {
        Self { status: "deleted" }
    }
}

/// Health check body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
