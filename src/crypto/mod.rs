//! Password-based content encryption.
//!
//! - [`kdf`]: Argon2id key derivation from a password and a per-file salt
//! - [`cipher`]: chained-chunk XChaCha20-Poly1305 content encryption
//!
//! Salt and nonce are not secret and are stored with the file record.
//! The key is never stored; every download re-derives it from the
//! password supplied with the request.

pub mod cipher;
pub mod kdf;

pub use cipher::{
    decrypt, encrypt, generate_nonce, plaintext_len, sealed_len, DecryptingReader, SealedContent,
    StreamDecryptor, StreamEncryptor, CHUNK_SIZE, SEALED_CHUNK_SIZE,
};
pub use kdf::{derive_key, generate_salt, KdfParams, VaultKey};

/// Derived key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Per-file salt length in bytes.
pub const SALT_SIZE: usize = 16;

/// Per-file nonce prefix length in bytes.
///
/// The chunk index fills the remaining 8 bytes of the 24-byte XChaCha20 nonce.
pub const NONCE_SIZE: usize = 16;

/// Poly1305 tag length in bytes.
pub const TAG_SIZE: usize = 16;
