//! Encrypted file vault.
//!
//! This module provides:
//! - Ciphertext blob storage with staged writes ([`BlobStorage`])
//! - File metadata records ([`FileRecord`], [`FileRepository`])
//! - The vault service tying key derivation, encryption and storage together ([`VaultStore`])

mod record;
mod service;
mod storage;

pub use record::{FileRecord, FileRepository, NewFileRecord};
pub use service::{RecoveryReport, VaultStore};
pub use storage::{BlobScan, BlobStorage, StagedBlob};

use crate::{Result, VaultError};

/// Minimum password length for uploads.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Maximum password length.
pub const MAX_PASSWORD_LENGTH: usize = 1024;

/// Maximum filename length in characters.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Normalize a client-supplied filename.
///
/// Strips any directory components and control characters, trims whitespace
/// and caps the length. The result is only ever used as a display name.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_FILENAME_LENGTH)
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(VaultError::Validation("filename is required".to_string()));
    }
    Ok(cleaned)
}

/// Check a password chosen for a new upload.
pub fn validate_new_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(VaultError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(VaultError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Check a password supplied to unlock a download.
///
/// Only presence and the upper bound are checked; correctness is decided by
/// decryption alone.
pub fn validate_unlock_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::Validation("password is required".to_string()));
    }
    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(VaultError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("  notes.txt ").unwrap(), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\a.doc").unwrap(), "a.doc");
        assert_eq!(sanitize_filename("bad\r\nname.txt").unwrap(), "badname.txt");
        assert_eq!(sanitize_filename("日本語.txt").unwrap(), "日本語.txt");
    }

    #[test]
    fn test_sanitize_filename_rejects_empty() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("   ").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
    }

    #[test]
    fn test_sanitize_filename_truncates() {
        let long = "a".repeat(400);
        assert_eq!(
            sanitize_filename(&long).unwrap().chars().count(),
            MAX_FILENAME_LENGTH
        );
    }

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("secret123").is_ok());
        assert!(validate_new_password("12345").is_err());
        assert!(validate_new_password("").is_err());
        assert!(validate_new_password(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_unlock_password() {
        assert!(validate_unlock_password("wrong").is_ok());
        assert!(validate_unlock_password("").is_err());
    }
}
