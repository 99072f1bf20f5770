//! File handlers for Web API.

use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::Response,
    Json,
};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::fs::File;
use zeroize::Zeroizing;

use crate::crypto::DecryptingReader;
use crate::vault::FileRecord;
use crate::web::dto::{FileResponse, PasswordQuery, ShareLinkResponse, StatusResponse};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;
use crate::VaultError;

/// Generate a safe Content-Disposition header value for file downloads.
///
/// Control characters are dropped (no header injection), quotes and
/// backslashes are replaced in the quoted fallback, and names that are not
/// plain ASCII also get an RFC 5987 `filename*` parameter.
pub(crate) fn content_disposition_header(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let cleaned: String = filename.chars().filter(|c| !c.is_control()).collect();
    let encoded = urlencoding::encode(&cleaned);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

/// Build a streaming response for a decrypted file.
///
/// The first chunk has already been authenticated, so headers can be sent.
/// A failure later in the stream aborts the body.
pub(crate) fn decrypted_file_response(
    record: &FileRecord,
    reader: DecryptingReader<File>,
) -> Result<Response<Body>, ApiError> {
    let content_type = mime_guess::from_path(&record.filename)
        .first_or_octet_stream()
        .to_string();

    let file_id = record.id.clone();
    let stream = reader.into_stream().map_err(move |e| {
        tracing::error!(file_id = %file_id, error = %e, "Decryption failed mid-stream");
        e
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&record.filename),
        )
        .header(header::CONTENT_LENGTH, record.size)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            ApiError::internal("Failed to build response")
        })
}

/// Take a non-empty password or report it missing.
pub(crate) fn require_password(password: Option<String>) -> Result<Zeroizing<String>, ApiError> {
    password
        .filter(|p| !p.is_empty())
        .map(Zeroizing::new)
        .ok_or_else(|| ApiError::validation("Password is required"))
}

fn multipart_vault_error(e: MultipartError, limit: u64) -> VaultError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        VaultError::TooLarge(limit)
    } else {
        VaultError::Validation(format!("invalid multipart data: {}", e.body_text()))
    }
}

fn multipart_error(e: MultipartError, limit: u64) -> ApiError {
    tracing::debug!("Failed to read multipart field: {}", e);
    multipart_vault_error(e, limit).into()
}

/// Read a file field into memory while the password is still unknown.
async fn buffer_field(mut field: Field<'_>, limit: u64) -> Result<Vec<Bytes>, ApiError> {
    let mut chunks = Vec::new();
    let mut total: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        total += chunk.len() as u64;
        if total > limit {
            return Err(VaultError::TooLarge(limit).into());
        }
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// POST /files/upload - Encrypt and store a file.
///
/// Multipart fields: `file` and `password`. The password may also be given
/// as `?password=`. When the password is known before the file field, the
/// file is encrypted as it streams in; otherwise the file is held in memory
/// (bounded by the upload limit) until the password arrives. Plaintext never
/// touches the disk.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PasswordQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), ApiError> {
    let owner_id = auth.owner_id();
    let limit = state.vault.max_upload_bytes();

    let mut password = query.password.filter(|p| !p.is_empty()).map(Zeroizing::new);
    let mut buffered: Option<(String, Vec<Bytes>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "password" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                password = Some(Zeroizing::new(value));
            }
            "file" => {
                if buffered.is_some() {
                    return Err(ApiError::validation("Only one file may be uploaded at a time"));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::validation("File name is required"))?;

                if let Some(password) = password.as_ref() {
                    let plaintext = field.map_err(move |e| multipart_vault_error(e, limit));
                    let record = state
                        .vault
                        .upload(owner_id, &filename, password.as_str(), plaintext)
                        .await?;
                    return Ok((StatusCode::CREATED, Json(FileResponse::from(record))));
                }

                buffered = Some((filename, buffer_field(field, limit).await?));
            }
            _ => {}
        }
    }

    let (filename, chunks) = buffered.ok_or_else(|| ApiError::validation("File is required"))?;
    let password = password.ok_or_else(|| ApiError::validation("Password is required"))?;

    let plaintext = futures::stream::iter(chunks.into_iter().map(Ok::<_, VaultError>));
    let record = state
        .vault
        .upload(owner_id, &filename, password.as_str(), plaintext)
        .await?;

    Ok((StatusCode::CREATED, Json(FileResponse::from(record))))
}

/// GET /files - List the caller's files, newest first.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    let files = state.vault.list(auth.owner_id()).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

/// GET /files/:id/download?password= - Decrypt and download a file.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(file_id): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Response<Body>, ApiError> {
    let password = require_password(query.password)?;

    let (record, reader) = state
        .vault
        .open_owned(auth.owner_id(), &file_id, password.as_str())
        .await?;

    tracing::info!(file_id = %record.id, owner_id = auth.owner_id(), "Owner download started");
    decrypted_file_response(&record, reader)
}

/// DELETE /files/:id - Delete a file and its share links.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(file_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.vault.delete(auth.owner_id(), &file_id).await?;
    Ok(Json(StatusResponse::deleted()))
}

/// GET /files/:id/shares - List the share links of a file.
pub async fn list_file_shares(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(file_id): Path<String>,
) -> Result<Json<Vec<ShareLinkResponse>>, ApiError> {
    let links = state
        .shares
        .list_for_file(auth.owner_id(), &file_id)
        .await?;
    Ok(Json(links.into_iter().map(ShareLinkResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_header_simple_ascii() {
        let result = content_disposition_header("report.pdf");
        assert_eq!(result, "attachment; filename=\"report.pdf\"");
    }

    #[test]
    fn test_content_disposition_header_with_spaces() {
        let result = content_disposition_header("quarterly report.pdf");
        assert_eq!(result, "attachment; filename=\"quarterly report.pdf\"");
    }

    #[test]
    fn test_content_disposition_header_non_ascii() {
        let result = content_disposition_header("日本語ファイル.txt");
        assert!(result.starts_with("attachment; filename=\"_______.txt\""));
        assert!(result.contains("filename*=UTF-8''"));
        assert!(result.contains("%E6%97%A5%E6%9C%AC%E8%AA%9E"));
        assert!(result.is_ascii());
    }

    #[test]
    fn test_content_disposition_header_double_quote() {
        let result = content_disposition_header("test\"file.txt");
        assert!(result.contains("filename=\"test_file.txt\""));
        assert!(result.contains("filename*=UTF-8''"));
        assert!(result.contains("%22"));
    }

    #[test]
    fn test_content_disposition_header_backslash() {
        let result = content_disposition_header("test\\file.txt");
        assert!(result.contains("filename=\"test_file.txt\""));
        assert!(result.contains("filename*=UTF-8''"));
    }

    #[test]
    fn test_content_disposition_header_control_characters() {
        // CR/LF header injection attempt
        let result = content_disposition_header("test\r\nX-Injected: bad.txt");
        assert!(!result.contains('\r'));
        assert!(!result.contains('\n'));
        assert!(!result.contains("%0D%0A"));
        assert!(result.starts_with("attachment; filename="));
    }

    #[test]
    fn test_content_disposition_header_null_character() {
        let result = content_disposition_header("test\x00null.txt");
        assert!(!result.contains('\x00'));
        assert!(result.contains("filename=\"testnull.txt\""));
    }

    #[test]
    fn test_require_password() {
        assert!(require_password(None).is_err());
        assert!(require_password(Some(String::new())).is_err());
        assert_eq!(
            require_password(Some("secret123".to_string())).unwrap().as_str(),
            "secret123"
        );
    }
}
