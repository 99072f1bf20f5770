//! Database schema and migrations.
//!
//! Each migration is applied once, in order, and recorded in `schema_version`.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Encrypted file records
    r#"
CREATE TABLE files (
    id              TEXT PRIMARY KEY,           -- UUID v4
    owner_id        INTEGER NOT NULL,
    filename        TEXT NOT NULL,              -- original name, for Content-Disposition
    blob_name       TEXT NOT NULL UNIQUE,       -- ciphertext blob in storage
    size            INTEGER NOT NULL,           -- plaintext length
    ciphertext_size INTEGER NOT NULL,
    salt            BLOB NOT NULL UNIQUE,       -- Argon2id salt
    nonce           BLOB NOT NULL UNIQUE,       -- content nonce prefix
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_files_owner ON files(owner_id, created_at);
"#,
    // v2: Share links
    r#"
CREATE TABLE share_links (
    token           TEXT PRIMARY KEY,
    file_id         TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    created_by      INTEGER NOT NULL,
    expires_at      TEXT,                       -- NULL = never
    max_downloads   INTEGER,                    -- NULL = unlimited
    downloads_used  INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    CHECK (max_downloads IS NULL OR downloads_used <= max_downloads)
);

CREATE INDEX idx_share_links_file ON share_links(file_id);
CREATE INDEX idx_share_links_expires ON share_links(expires_at);
"#,
];
