//! File record types and repository.

use crate::db::DbPool;
use crate::{Result, VaultError};

/// Metadata for one encrypted file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    /// File ID (UUID v4).
    pub id: String,
    /// Owner user ID.
    pub owner_id: i64,
    /// Original filename.
    pub filename: String,
    /// Ciphertext blob name in storage.
    pub blob_name: String,
    /// Plaintext size in bytes.
    pub size: i64,
    /// Ciphertext size in bytes.
    pub ciphertext_size: i64,
    /// Key derivation salt.
    pub salt: Vec<u8>,
    /// Content nonce.
    pub nonce: Vec<u8>,
    /// When the file was uploaded.
    pub created_at: String,
}

impl FileRecord {
    /// Check whether `owner_id` owns this file.
    pub fn is_owned_by(&self, owner_id: i64) -> bool {
        self.owner_id == owner_id
    }
}

/// Data for inserting a file record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub id: String,
    pub owner_id: i64,
    pub filename: String,
    pub blob_name: String,
    pub size: i64,
    pub ciphertext_size: i64,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
}

const FILE_COLUMNS: &str =
    "id, owner_id, filename, blob_name, size, ciphertext_size, salt, nonce, created_at";

/// Repository for file records.
pub struct FileRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FileRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a file record.
    pub async fn create(&self, new_file: &NewFileRecord) -> Result<FileRecord> {
        let sql = format!(
            "INSERT INTO files (id, owner_id, filename, blob_name, size, ciphertext_size, salt, nonce)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {FILE_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(&new_file.id)
            .bind(new_file.owner_id)
            .bind(&new_file.filename)
            .bind(&new_file.blob_name)
            .bind(new_file.size)
            .bind(new_file.ciphertext_size)
            .bind(&new_file.salt)
            .bind(&new_file.nonce)
            .fetch_one(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Get a file record by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1");
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// List an owner's files, newest first.
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = $1
             ORDER BY created_at DESC, rowid DESC"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Delete a file record owned by `owner_id`.
    ///
    /// Returns the deleted record, or `None` if no such record belongs to the owner.
    pub async fn delete_owned(&self, id: &str, owner_id: i64) -> Result<Option<FileRecord>> {
        let sql = format!(
            "DELETE FROM files WHERE id = $1 AND owner_id = $2 RETURNING {FILE_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }

    /// Names of all referenced blobs.
    pub async fn list_blob_names(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT blob_name FROM files")
            .fetch_all(self.pool)
            .await
            .map_err(|e| VaultError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn new_record(id: &str, owner_id: i64) -> NewFileRecord {
        NewFileRecord {
            id: id.to_string(),
            owner_id,
            filename: "report.pdf".to_string(),
            blob_name: format!("{id}.enc"),
            size: 5,
            ciphertext_size: 21,
            salt: id.as_bytes().to_vec(),
            nonce: format!("n-{id}").into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FileRepository::new(db.pool());

        let created = repo.create(&new_record("f1", 7)).await.unwrap();
        assert_eq!(created.id, "f1");
        assert_eq!(created.owner_id, 7);
        assert_eq!(created.filename, "report.pdf");
        assert!(!created.created_at.is_empty());

        let fetched = repo.get_by_id("f1").await.unwrap().unwrap();
        assert_eq!(fetched.blob_name, "f1.enc");
        assert_eq!(fetched.salt, b"f1".to_vec());
        assert!(fetched.is_owned_by(7));
        assert!(!fetched.is_owned_by(8));

        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_salt_reuse_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FileRepository::new(db.pool());

        repo.create(&new_record("f1", 1)).await.unwrap();
        let mut dup = new_record("f2", 1);
        dup.salt = b"f1".to_vec();
        assert!(matches!(
            repo.create(&dup).await,
            Err(VaultError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FileRepository::new(db.pool());

        repo.create(&new_record("a", 1)).await.unwrap();
        repo.create(&new_record("b", 1)).await.unwrap();
        repo.create(&new_record("c", 2)).await.unwrap();

        let files = repo.list_by_owner(1).await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(repo.list_by_owner(2).await.unwrap().len(), 1);
        assert!(repo.list_by_owner(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_owned() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FileRepository::new(db.pool());
        repo.create(&new_record("f1", 1)).await.unwrap();

        assert!(repo.delete_owned("f1", 2).await.unwrap().is_none());
        assert_eq!(repo.list_blob_names().await.unwrap(), vec!["f1.enc"]);

        let deleted = repo.delete_owned("f1", 1).await.unwrap().unwrap();
        assert_eq!(deleted.blob_name, "f1.enc");
        assert!(repo.list_blob_names().await.unwrap().is_empty());
        assert!(repo.get_by_id("f1").await.unwrap().is_none());
    }
}
