//! Key derivation: password + salt → content key (Argon2id).

use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroize;

use super::{KEY_SIZE, SALT_SIZE};
use crate::{Result, VaultError};

/// A 256-bit content key derived from a password.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct VaultKey {
    bytes: [u8; KEY_SIZE],
}

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use these for stored data.
    pub fn for_testing() -> Self {
        Self {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Check that Argon2 accepts these parameters.
    pub fn validate(&self) -> Result<()> {
        self.to_argon2_params().map(|_| ())
    }

    fn to_argon2_params(&self) -> Result<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| VaultError::Config(format!("invalid Argon2id params: {e}")))
    }
}

/// Generate a fresh random salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a content key from a password and salt.
///
/// Deterministic: the same password, salt and parameters always yield the
/// same key. Fails only on malformed input (empty password, wrong salt length).
pub fn derive_key(password: &[u8], salt: &[u8], params: &KdfParams) -> Result<VaultKey> {
    if password.is_empty() {
        return Err(VaultError::Validation("password must not be empty".into()));
    }
    if salt.len() != SALT_SIZE {
        return Err(VaultError::Validation(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }

    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        params.to_argon2_params()?,
    );

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| VaultError::Internal(format!("Argon2id KDF failed: {e}")))?;

    Ok(VaultKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let salt = [1u8; SALT_SIZE];
        let params = KdfParams::for_testing();

        let k1 = derive_key(b"secret123", &salt, &params).unwrap();
        let k2 = derive_key(b"secret123", &salt, &params).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_different_salts_give_different_keys() {
        let params = KdfParams::for_testing();

        let k1 = derive_key(b"secret123", &[1u8; SALT_SIZE], &params).unwrap();
        let k2 = derive_key(b"secret123", &[2u8; SALT_SIZE], &params).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_different_passwords_give_different_keys() {
        let salt = [7u8; SALT_SIZE];
        let params = KdfParams::for_testing();

        let k1 = derive_key(b"secret123", &salt, &params).unwrap();
        let k2 = derive_key(b"secret124", &salt, &params).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_rejects_bad_salt_length() {
        let params = KdfParams::for_testing();
        let result = derive_key(b"secret123", &[0u8; 8], &params);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_rejects_empty_password() {
        let params = KdfParams::for_testing();
        let result = derive_key(b"", &[0u8; SALT_SIZE], &params);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_generate_salt_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_params_validate() {
        assert!(KdfParams::default().validate().is_ok());
        assert!(KdfParams::for_testing().validate().is_ok());

        let bad = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 0,
            parallelism: 1,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = VaultKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{:?}", key);
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }
}
