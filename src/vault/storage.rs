//! Ciphertext blob storage.
//!
//! Blobs are stored in a sharded directory structure:
//! ```text
//! {base_path}/
//! ├── 3f/
//! │   ├── 3f2a9c1e-....enc        committed blob
//! │   └── 3f77d0b2-....partial    upload in progress (never read)
//! └── ...
//! ```
//!
//! A blob only becomes visible under its `.enc` name after it has been
//! fully written and synced, so a reader never sees half an upload.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{Result, VaultError};

/// Extension of committed ciphertext blobs.
const BLOB_EXT: &str = "enc";

/// Extension of blobs still being written.
const PARTIAL_EXT: &str = "partial";

/// Storage for encrypted file contents.
#[derive(Debug, Clone)]
pub struct BlobStorage {
    base_path: PathBuf,
}

impl BlobStorage {
    /// Create a new BlobStorage rooted at `base_path`, creating the directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            VaultError::Storage(format!(
                "cannot create blob directory {}: {e}",
                base_path.display()
            ))
        })?;
        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Blob name for a file id.
    pub fn blob_name(file_id: &str) -> String {
        format!("{file_id}.{BLOB_EXT}")
    }

    /// Full path of a committed blob.
    pub fn blob_path(&self, blob_name: &str) -> PathBuf {
        self.base_path.join(Self::shard(blob_name)).join(blob_name)
    }

    /// Start writing a new blob. Nothing is visible until [`StagedBlob::commit`].
    pub async fn stage(&self, blob_name: &str) -> Result<StagedBlob> {
        let final_path = self.blob_path(blob_name);
        let partial_path = final_path.with_extension(PARTIAL_EXT);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(storage_err)?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .await
            .map_err(storage_err)?;

        Ok(StagedBlob {
            file: Some(file),
            partial_path,
            final_path,
            written: 0,
            finished: false,
        })
    }

    /// Open a committed blob for reading.
    ///
    /// The returned handle stays readable even if the blob is deleted afterwards.
    pub async fn open(&self, blob_name: &str) -> Result<File> {
        match File::open(self.blob_path(blob_name)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(VaultError::NotFound("file".to_string()))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Delete a committed blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it didn't exist.
    pub async fn delete(&self, blob_name: &str) -> Result<bool> {
        match fs::remove_file(self.blob_path(blob_name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Check if a committed blob exists.
    pub async fn exists(&self, blob_name: &str) -> bool {
        fs::try_exists(self.blob_path(blob_name))
            .await
            .unwrap_or(false)
    }

    /// Scan the shard directories.
    ///
    /// Removes every leftover `.partial` file and empty shard directory, and
    /// returns the names of all committed blobs.
    pub async fn scan(&self) -> Result<BlobScan> {
        let mut scan = BlobScan::default();

        let mut shards = fs::read_dir(&self.base_path).await.map_err(storage_err)?;
        while let Some(shard) = shards.next_entry().await.map_err(storage_err)? {
            let shard_path = shard.path();
            if !shard.file_type().await.map_err(storage_err)?.is_dir() {
                continue;
            }

            let mut entries = fs::read_dir(&shard_path).await.map_err(storage_err)?;
            let mut remaining = 0usize;
            while let Some(entry) = entries.next_entry().await.map_err(storage_err)? {
                let path = entry.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some(PARTIAL_EXT) => match fs::remove_file(&path).await {
                        Ok(()) => scan.partials_removed += 1,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to remove partial blob");
                            remaining += 1;
                        }
                    },
                    Some(BLOB_EXT) => {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            scan.blobs.push(name.to_string());
                        }
                        remaining += 1;
                    }
                    _ => remaining += 1,
                }
            }

            if remaining == 0 && fs::remove_dir(&shard_path).await.is_ok() {
                debug!(path = %shard_path.display(), "Removed empty shard directory");
            }
        }

        Ok(scan)
    }

    /// Shard directory for a blob name: its first two characters.
    fn shard(blob_name: &str) -> &str {
        match blob_name.char_indices().nth(2) {
            Some((i, _)) => &blob_name[..i],
            None => blob_name,
        }
    }
}

/// Result of [`BlobStorage::scan`].
#[derive(Debug, Default)]
pub struct BlobScan {
    /// Names of committed blobs found on disk.
    pub blobs: Vec<String>,
    /// Number of `.partial` files removed.
    pub partials_removed: usize,
}

/// A blob being written.
///
/// Dropping a staged blob without committing removes its `.partial` file,
/// so a cancelled upload leaves nothing behind.
#[derive(Debug)]
pub struct StagedBlob {
    file: Option<File>,
    partial_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    /// Set once the blob was committed or removed.
    finished: bool,
}

impl StagedBlob {
    /// Append bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| VaultError::Internal("write to finished blob".to_string()))?;
        file.write_all(data).await.map_err(storage_err)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, sync and atomically move the blob to its final name.
    pub async fn commit(mut self) -> Result<u64> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| VaultError::Internal("blob already finished".to_string()))?;
        file.flush().await.map_err(storage_err)?;
        file.sync_all().await.map_err(storage_err)?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path)
            .await
            .map_err(storage_err)?;
        self.finished = true;
        Ok(self.written)
    }

    /// Discard the staged data.
    pub async fn abort(mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.partial_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.partial_path.display(), error = %e, "Failed to remove staged blob");
            }
        }
        self.finished = true;
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => {
                debug!(path = %self.partial_path.display(), "Removed abandoned staged blob");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.partial_path.display(), error = %e, "Failed to remove staged blob");
            }
        }
    }
}

fn storage_err(e: io::Error) -> VaultError {
    VaultError::Storage(e.to_string())
}
