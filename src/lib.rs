//! FileVault - encrypted file vault with password-protected share links.
//!
//! Files are encrypted at rest under a key derived from a per-file password.
//! Owners can mint share links that let anyone holding the link and the
//! password download a file, optionally limited by time and download count.

pub mod config;
pub mod crypto;
pub mod datetime;
pub mod db;
pub mod error;
pub mod logging;
pub mod share;
pub mod vault;
pub mod web;

pub use config::Config;
pub use db::Database;
pub use error::{Result, VaultError};
pub use share::{ShareLink, ShareLinkManager};
pub use vault::{BlobStorage, FileRecord, VaultStore};
pub use web::WebServer;
