//! API handlers.

pub mod file;
pub mod health;
pub mod share;

pub use file::*;
pub use health::*;
pub use share::*;

use crate::share::ShareLinkManager;
use crate::vault::VaultStore;

/// Shared state for all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Encrypted file vault.
    pub vault: VaultStore,
    /// Share link lifecycle.
    pub shares: ShareLinkManager,
}

impl AppState {
    /// Create the state around a vault.
    pub fn new(vault: VaultStore) -> Self {
        let shares = ShareLinkManager::new(vault.clone());
        Self { vault, shares }
    }

    /// Largest multipart body accepted on upload.
    ///
    /// The plaintext limit is enforced exactly while encrypting; this only
    /// leaves room for multipart framing and the other form fields.
    pub fn upload_body_limit(&self) -> usize {
        const FORM_OVERHEAD: u64 = 64 * 1024;
        usize::try_from(self.vault.max_upload_bytes().saturating_add(FORM_OVERHEAD))
            .unwrap_or(usize::MAX)
    }
}
