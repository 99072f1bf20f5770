//! Vault service.
//!
//! Upload: derive key → encrypt while streaming → stage blob → commit blob → insert record.
//! Delete: remove record (share links cascade) → remove blob.
//!
//! A crash between the two steps of either path leaves at most an orphaned
//! blob, which [`VaultStore::recover`] removes at startup.

use std::collections::HashSet;
use std::time::Duration;

use futures::{Stream, TryStreamExt};
use tokio::fs::File;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::record::{FileRecord, FileRepository, NewFileRecord};
use super::storage::{BlobStorage, StagedBlob};
use super::{sanitize_filename, validate_new_password, validate_unlock_password};
use crate::crypto::{
    derive_key, generate_nonce, generate_salt, plaintext_len, DecryptingReader, KdfParams,
    StreamEncryptor, VaultKey, NONCE_SIZE, SALT_SIZE,
};
use crate::db::Database;
use crate::{Result, VaultError};

/// Summary of a startup recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unfinished uploads removed.
    pub partials_removed: usize,
    /// Committed blobs without a metadata record removed.
    pub orphans_removed: usize,
}

/// Encrypted file vault.
///
/// Cloning is cheap; clones share the database pool.
#[derive(Debug, Clone)]
pub struct VaultStore {
    db: Database,
    storage: BlobStorage,
    kdf: KdfParams,
    io_timeout: Duration,
    max_upload_bytes: u64,
}

impl VaultStore {
    /// Create a new vault.
    pub fn new(db: Database, storage: BlobStorage, kdf: KdfParams) -> Self {
        Self {
            db,
            storage,
            kdf,
            io_timeout: Duration::from_secs(240),
            max_upload_bytes: u64::MAX,
        }
    }

    /// Set the timeout for staging one blob.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Set the maximum plaintext upload size.
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Get the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get the blob storage.
    pub fn storage(&self) -> &BlobStorage {
        &self.storage
    }

    /// Maximum plaintext upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Store already-encrypted content.
    ///
    /// The ciphertext is staged under the I/O timeout and committed before
    /// the record is inserted. On any failure the blob is removed and the
    /// error returned; the caller may retry the whole upload.
    pub async fn put<S>(
        &self,
        owner_id: i64,
        filename: &str,
        ciphertext: S,
        salt: &[u8],
        nonce: &[u8],
    ) -> Result<FileRecord>
    where
        S: Stream<Item = Result<Vec<u8>>>,
    {
        let filename = sanitize_filename(filename)?;
        if salt.len() != SALT_SIZE || nonce.len() != NONCE_SIZE {
            return Err(VaultError::Validation(
                "salt or nonce has the wrong length".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let blob_name = BlobStorage::blob_name(&id);
        let mut staged = self.storage.stage(&blob_name).await?;

        let written = tokio::time::timeout(self.io_timeout, write_blob(&mut staged, ciphertext)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                staged.abort().await;
                return Err(e);
            }
            Err(_) => {
                staged.abort().await;
                warn!(file_id = %id, owner_id, "Upload timed out while staging ciphertext");
                return Err(VaultError::Storage("upload timed out".to_string()));
            }
        }

        let ciphertext_size = staged.written();
        let size = match plaintext_len(ciphertext_size) {
            Some(size) => size,
            None => {
                staged.abort().await;
                return Err(VaultError::Validation(
                    "ciphertext is not well-formed".to_string(),
                ));
            }
        };
        staged.commit().await?;

        let new_record = NewFileRecord {
            id: id.clone(),
            owner_id,
            filename,
            blob_name: blob_name.clone(),
            size: size as i64,
            ciphertext_size: ciphertext_size as i64,
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
        };

        match FileRepository::new(self.db.pool()).create(&new_record).await {
            Ok(record) => {
                info!(file_id = %record.id, owner_id, size = record.size, "File stored");
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&blob_name).await {
                    warn!(file_id = %id, error = %cleanup, "Failed to remove blob after insert failure");
                }
                Err(e)
            }
        }
    }

    /// Encrypt a plaintext stream under `password` and store it.
    ///
    /// The plaintext is never buffered beyond one chunk; the size limit is
    /// enforced as bytes arrive.
    pub async fn upload<S, B>(
        &self,
        owner_id: i64,
        filename: &str,
        password: &str,
        plaintext: S,
    ) -> Result<FileRecord>
    where
        S: Stream<Item = Result<B>>,
        B: AsRef<[u8]>,
    {
        sanitize_filename(filename)?;
        validate_new_password(password)?;

        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = self.derive_key(password, &salt).await?;

        let ciphertext = encrypt_stream(
            Box::pin(plaintext),
            StreamEncryptor::new(&key, nonce),
            self.max_upload_bytes,
        );
        drop(key);

        self.put(owner_id, filename, ciphertext, &salt, &nonce).await
    }

    /// Get a file record and an open handle to its ciphertext.
    pub async fn get(&self, file_id: &str) -> Result<(FileRecord, File)> {
        let record = self.get_record(file_id).await?;
        let blob = self.storage.open(&record.blob_name).await?;
        Ok((record, blob))
    }

    /// Get a file record.
    pub async fn get_record(&self, file_id: &str) -> Result<FileRecord> {
        FileRepository::new(self.db.pool())
            .get_by_id(file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Get a file record, checking ownership.
    pub async fn get_owned(&self, owner_id: i64, file_id: &str) -> Result<FileRecord> {
        let record = self.get_record(file_id).await?;
        if !record.is_owned_by(owner_id) {
            return Err(VaultError::Forbidden("file".to_string()));
        }
        Ok(record)
    }

    /// List an owner's files, newest first.
    pub async fn list(&self, owner_id: i64) -> Result<Vec<FileRecord>> {
        FileRepository::new(self.db.pool())
            .list_by_owner(owner_id)
            .await
    }

    /// Delete a file and its ciphertext.
    ///
    /// Downloads that already opened the blob keep reading it to the end.
    pub async fn delete(&self, owner_id: i64, file_id: &str) -> Result<()> {
        self.get_owned(owner_id, file_id).await?;

        let record = FileRepository::new(self.db.pool())
            .delete_owned(file_id, owner_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;

        // The record is gone, so a failure here only leaves an orphan for recover().
        if let Err(e) = self.storage.delete(&record.blob_name).await {
            warn!(file_id = %record.id, error = %e, "Failed to remove blob of deleted file");
        }

        info!(file_id = %record.id, owner_id, "File deleted");
        Ok(())
    }

    /// Open a file for decryption with `password`.
    ///
    /// The first chunk is authenticated before this returns, so a wrong
    /// password fails here with `DecryptionFailed`.
    pub async fn open_decrypted(
        &self,
        record: &FileRecord,
        password: &str,
    ) -> Result<DecryptingReader<File>> {
        validate_unlock_password(password)?;

        let blob = self.storage.open(&record.blob_name).await?;
        let key = self.derive_key(password, &record.salt).await?;
        DecryptingReader::open(blob, &key, &record.nonce).await
    }

    /// Owner download: check ownership, then open for decryption.
    pub async fn open_owned(
        &self,
        owner_id: i64,
        file_id: &str,
        password: &str,
    ) -> Result<(FileRecord, DecryptingReader<File>)> {
        let record = self.get_owned(owner_id, file_id).await?;
        let reader = self.open_decrypted(&record, password).await?;
        Ok((record, reader))
    }

    /// Remove unfinished uploads and blobs without a record.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let scan = self.storage.scan().await?;

        let known: HashSet<String> = FileRepository::new(self.db.pool())
            .list_blob_names()
            .await?
            .into_iter()
            .collect();

        let mut report = RecoveryReport {
            partials_removed: scan.partials_removed,
            orphans_removed: 0,
        };

        for blob in scan.blobs.iter().filter(|b| !known.contains(*b)) {
            match self.storage.delete(blob).await {
                Ok(true) => report.orphans_removed += 1,
                Ok(false) => {}
                Err(e) => warn!(blob = %blob, error = %e, "Failed to remove orphaned blob"),
            }
        }

        if report != RecoveryReport::default() {
            info!(
                partials = report.partials_removed,
                orphans = report.orphans_removed,
                "Vault recovery removed stale blobs"
            );
        } else {
            debug!("Vault recovery found nothing to remove");
        }
        Ok(report)
    }

    /// Derive a key off the async runtime.
    async fn derive_key(&self, password: &str, salt: &[u8]) -> Result<VaultKey> {
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let salt = salt.to_vec();
        let params = self.kdf.clone();

        tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
            .await
            .map_err(|e| VaultError::Internal(format!("key derivation task failed: {e}")))?
    }
}

async fn write_blob<S>(staged: &mut StagedBlob, ciphertext: S) -> Result<()>
where
    S: Stream<Item = Result<Vec<u8>>>,
{
    let mut ciphertext = std::pin::pin!(ciphertext);
    while let Some(chunk) = ciphertext.try_next().await? {
        staged.write(&chunk).await?;
    }
    Ok(())
}

struct EncryptState<S> {
    plaintext: S,
    encryptor: Option<StreamEncryptor>,
    received: u64,
    limit: u64,
}

/// Encrypt a plaintext stream into sealed ciphertext pieces.
///
/// Empty input and input over `limit` bytes are rejected.
fn encrypt_stream<S, B>(
    plaintext: S,
    encryptor: StreamEncryptor,
    limit: u64,
) -> impl Stream<Item = Result<Vec<u8>>>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = EncryptState {
        plaintext,
        encryptor: Some(encryptor),
        received: 0,
        limit,
    };

    futures::stream::try_unfold(state, |mut state| async move {
        let Some(mut encryptor) = state.encryptor.take() else {
            return Ok(None);
        };

        while let Some(piece) = state.plaintext.try_next().await? {
            let piece = piece.as_ref();
            state.received += piece.len() as u64;
            if state.received > state.limit {
                return Err(VaultError::TooLarge(state.limit));
            }

            let sealed = encryptor.update(piece)?;
            if !sealed.is_empty() {
                state.encryptor = Some(encryptor);
                return Ok(Some((sealed, state)));
            }
        }

        if state.received == 0 {
            return Err(VaultError::Validation("file is empty".to_string()));
        }
        let last = encryptor.finalize()?;
        Ok::<_, VaultError>(Some((last, state)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt, CHUNK_SIZE};
    use crate::share::{NewShareLink, ShareLinkRepository};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, VaultStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let storage = BlobStorage::new(temp_dir.path().join("blobs")).unwrap();
        let vault = VaultStore::new(db, storage, KdfParams::for_testing())
            .with_max_upload_bytes(1024 * 1024);
        (temp_dir, vault)
    }

    fn plaintext_stream(
        data: &[u8],
        piece: usize,
    ) -> impl Stream<Item = Result<Vec<u8>>> + Unpin {
        let pieces: Vec<Result<Vec<u8>>> = data.chunks(piece).map(|c| Ok(c.to_vec())).collect();
        futures::stream::iter(pieces)
    }

    async fn upload(vault: &VaultStore, owner: i64, name: &str, password: &str, data: &[u8]) -> FileRecord {
        vault
            .upload(owner, name, password, plaintext_stream(data, 4096))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_download_roundtrip() {
        let (_dir, vault) = setup().await;
        let data = b"%PDF-1.7 quarterly numbers".to_vec();

        let record = upload(&vault, 1, "report.pdf", "secret123", &data).await;
        assert_eq!(record.filename, "report.pdf");
        assert_eq!(record.size, data.len() as i64);
        assert!(Uuid::parse_str(&record.id).is_ok());

        let (_, reader) = vault.open_owned(1, &record.id, "secret123").await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_wrong_password_fails() {
        let (_dir, vault) = setup().await;
        let record = upload(&vault, 1, "report.pdf", "secret123", b"data").await;

        let result = vault.open_owned(1, &record.id, "wrong").await;
        assert!(matches!(result, Err(VaultError::DecryptionFailed)));
    }

    #[tokio::test]
    async fn test_multi_chunk_upload() {
        let (_dir, vault) = setup().await;
        let data: Vec<u8> = (0..3 * CHUNK_SIZE + 99).map(|i| (i % 241) as u8).collect();

        let record = upload(&vault, 1, "big.bin", "secret123", &data).await;
        assert_eq!(record.size, data.len() as i64);
        assert_eq!(
            record.ciphertext_size as u64,
            crate::crypto::sealed_len(data.len() as u64)
        );

        let (_, reader) = vault.open_owned(1, &record.id, "secret123").await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_salt_and_nonce_unique_per_file() {
        let (_dir, vault) = setup().await;
        let a = upload(&vault, 1, "a.txt", "secret123", b"same").await;
        let b = upload(&vault, 1, "a.txt", "secret123", b"same").await;
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_file() {
        let (_dir, vault) = setup().await;
        let result = vault
            .upload(1, "empty.txt", "secret123", plaintext_stream(b"", 1))
            .await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
        assert!(vault.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_and_leaves_nothing() {
        let (_dir, vault) = setup().await;
        let vault = vault.with_max_upload_bytes(100);

        let result = vault
            .upload(1, "big.bin", "secret123", plaintext_stream(&[0u8; 101], 10))
            .await;
        assert!(matches!(result, Err(VaultError::TooLarge(100))));
        assert!(vault.list(1).await.unwrap().is_empty());

        let scan = vault.storage().scan().await.unwrap();
        assert!(scan.blobs.is_empty());
        assert_eq!(scan.partials_removed, 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_short_password() {
        let (_dir, vault) = setup().await;
        let result = vault
            .upload(1, "a.txt", "12345", plaintext_stream(b"data", 4))
            .await;
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stream_error_aborts_upload() {
        let (_dir, vault) = setup().await;
        let pieces: Vec<Result<Vec<u8>>> = vec![
            Ok(vec![1u8; 10]),
            Err(VaultError::Storage("connection reset".to_string())),
        ];
        let result = vault
            .upload(1, "a.txt", "secret123", futures::stream::iter(pieces))
            .await;
        assert!(matches!(result, Err(VaultError::Storage(_))));
        assert!(vault.list(1).await.unwrap().is_empty());
        assert!(vault.storage().scan().await.unwrap().blobs.is_empty());
    }

    #[tokio::test]
    async fn test_put_times_out() {
        let (_dir, vault) = setup().await;
        let vault = vault.with_io_timeout(Duration::from_millis(50));

        let stalled = futures::stream::pending::<Result<Vec<u8>>>();
        let result = vault
            .put(1, "slow.bin", stalled, &[1u8; SALT_SIZE], &[2u8; NONCE_SIZE])
            .await;
        assert!(matches!(result, Err(VaultError::Storage(_))));
        assert!(vault.list(1).await.unwrap().is_empty());
        assert_eq!(vault.storage().scan().await.unwrap().partials_removed, 0);
    }

    fn partial_files(root: &std::path::Path) -> usize {
        let mut count = 0;
        for shard in std::fs::read_dir(root).unwrap().flatten() {
            if !shard.path().is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(shard.path()).unwrap().flatten() {
                if entry.path().extension().is_some_and(|e| e == "partial") {
                    count += 1;
                }
            }
        }
        count
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_no_partial() {
        use futures::StreamExt;

        let (_dir, vault) = setup().await;
        let root = vault.storage().base_path().to_path_buf();

        // First piece arrives, then the client goes silent.
        let stalled = futures::stream::iter(vec![Ok::<_, VaultError>(vec![7u8; 200 * 1024])])
            .chain(futures::stream::pending());
        let uploader = vault.clone();
        let task = tokio::spawn(async move {
            uploader.upload(1, "big.bin", "secret123", stalled).await
        });

        let mut staged = false;
        for _ in 0..200 {
            if partial_files(&root) > 0 {
                staged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(staged, "upload never started staging");

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(partial_files(&root), 0);
        assert_eq!(vault.storage().scan().await.unwrap().partials_removed, 0);
        assert!(vault.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_precomputed_ciphertext() {
        let (_dir, vault) = setup().await;
        let salt = [9u8; SALT_SIZE];
        let key = derive_key(b"secret123", &salt, &KdfParams::for_testing()).unwrap();
        let sealed = encrypt(b"hello vault", &key).unwrap();

        let record = vault
            .put(
                4,
                "hello.txt",
                futures::stream::iter(vec![Ok(sealed.ciphertext)]),
                &salt,
                &sealed.nonce,
            )
            .await
            .unwrap();
        assert_eq!(record.size, 11);

        let (fetched, _blob) = vault.get(&record.id).await.unwrap();
        assert_eq!(fetched.owner_id, 4);

        let reader = vault.open_decrypted(&fetched, "secret123").await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), b"hello vault");
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let (_dir, vault) = setup().await;
        let record = upload(&vault, 1, "mine.txt", "secret123", b"private").await;

        assert!(matches!(
            vault.open_owned(2, &record.id, "secret123").await,
            Err(VaultError::Forbidden(_))
        ));
        assert!(matches!(
            vault.delete(2, &record.id).await,
            Err(VaultError::Forbidden(_))
        ));
        assert!(vault.list(2).await.unwrap().is_empty());
        assert_eq!(vault.list(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_record_blob_and_links() {
        let (_dir, vault) = setup().await;
        let record = upload(&vault, 1, "gone.txt", "secret123", b"bye").await;
        ShareLinkRepository::new(vault.db().pool())
            .create(&NewShareLink {
                token: "tok".to_string(),
                file_id: record.id.clone(),
                created_by: 1,
                expires_at: None,
                max_downloads: None,
            })
            .await
            .unwrap();

        vault.delete(1, &record.id).await.unwrap();

        assert!(vault.list(1).await.unwrap().is_empty());
        assert!(!vault.storage().exists(&record.blob_name).await);
        assert!(matches!(
            vault.get(&record.id).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            vault.open_owned(1, &record.id, "secret123").await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            vault.delete(1, &record.id).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(ShareLinkRepository::new(vault.db().pool())
            .get_by_token("tok")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_open_reader_survives_delete() {
        let (_dir, vault) = setup().await;
        let data: Vec<u8> = (0..2 * CHUNK_SIZE + 5).map(|i| (i % 7) as u8).collect();
        let record = upload(&vault, 1, "live.bin", "secret123", &data).await;

        let (_, reader) = vault.open_owned(1, &record.id, "secret123").await.unwrap();
        vault.delete(1, &record.id).await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_recover_removes_orphans() {
        let (_dir, vault) = setup().await;
        let kept = upload(&vault, 1, "kept.txt", "secret123", b"kept").await;

        let orphan = BlobStorage::blob_name(&Uuid::new_v4().to_string());
        let mut staged = vault.storage().stage(&orphan).await.unwrap();
        staged.write(b"orphan").await.unwrap();
        staged.commit().await.unwrap();

        let partial = BlobStorage::blob_name(&Uuid::new_v4().to_string());
        let mut staged = vault.storage().stage(&partial).await.unwrap();
        staged.write(b"half").await.unwrap();
        // A crash skips the destructor.
        std::mem::forget(staged);

        let report = vault.recover().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                partials_removed: 1,
                orphans_removed: 1
            }
        );
        assert!(vault.storage().exists(&kept.blob_name).await);
        assert!(!vault.storage().exists(&orphan).await);

        assert_eq!(vault.recover().await.unwrap(), RecoveryReport::default());
    }
}
