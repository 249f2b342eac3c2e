//! KEK/DEK key hierarchy. Grounded in `original_source/scrubiq/crypto/keys.py`:
//! a KEK is derived from user key material via scrypt; the DEK is 256 random
//! bits, generated once per vault and stored only wrapped under the KEK. The
//! live DEK exists solely in a `zeroize`d buffer and is wiped on `lock`.

use crate::aead::{self, AeadError, EncryptedBlob};
use crate::kdf::{self, KdfError, ScryptParams};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use zeroize::Zeroizing;

const DEK_AAD: &[u8] = b"phi-vault-dek";
/// Constant-minimum unlock duration, a timing-sidechannel mitigation per
/// spec.md §6's `unlock` contract.
const UNLOCK_MIN_DURATION: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error("kdf error: {0}")]
    Kdf(#[from] KdfError),
    #[error("invalid key: DEK unwrap failed MAC verification")]
    InvalidKey,
    #[error("session is locked; no live key material")]
    Locked,
    #[error("encryption failed")]
    Encrypt(#[from] AeadError),
}

/// Persisted row: `vault_meta(salt, encrypted_dek, scrypt_n)` per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeyMaterial {
    pub salt: Vec<u8>,
    pub encrypted_dek: EncryptedBlob,
    pub scrypt_log_n: u8,
}

pub struct KeyManager {
    stored: StoredKeyMaterial,
    live_dek: Option<Zeroizing<[u8; 32]>>,
}

impl KeyManager {
    /// Creates a brand-new vault: generates a random DEK, wraps it under a
    /// freshly derived KEK, and returns both the persisted material and an
    /// already-unlocked manager.
    pub fn generate(passphrase: &[u8], params: ScryptParams) -> Result<Self, KeyManagerError> {
        let salt = kdf::random_salt().to_vec();
        let kek = kdf::derive_kek(passphrase, &salt, params)?;

        let mut dek = Zeroizing::new([0u8; 32]);
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut *dek);

        let encrypted_dek = aead::encrypt(&kek, &*dek, DEK_AAD)?;
        let stored = StoredKeyMaterial {
            salt,
            encrypted_dek,
            scrypt_log_n: params.log_n,
        };

        Ok(Self {
            stored,
            live_dek: Some(dek),
        })
    }

    /// Loads a manager for an existing vault, in the locked state.
    pub fn from_stored(stored: StoredKeyMaterial) -> Self {
        Self {
            stored,
            live_dek: None,
        }
    }

    pub fn stored(&self) -> &StoredKeyMaterial {
        &self.stored
    }

    pub fn is_unlocked(&self) -> bool {
        self.live_dek.is_some()
    }

    /// Derives the KEK and unwraps the DEK. Runs for a constant minimum
    /// duration regardless of success or failure.
    pub fn unlock(&mut self, passphrase: &[u8]) -> Result<(), KeyManagerError> {
        let started = Instant::now();
        let result = self.unlock_inner(passphrase);
        let elapsed = started.elapsed();
        if elapsed < UNLOCK_MIN_DURATION {
            std::thread::sleep(UNLOCK_MIN_DURATION - elapsed);
        }
        result
    }

    fn unlock_inner(&mut self, passphrase: &[u8]) -> Result<(), KeyManagerError> {
        let params = ScryptParams {
            log_n: self.stored.scrypt_log_n,
            ..ScryptParams::default()
        };
        let kek = kdf::derive_kek(passphrase, &self.stored.salt, params)?;
        let dek_bytes = aead::decrypt(&kek, &self.stored.encrypted_dek, DEK_AAD)
            .map_err(|_| KeyManagerError::InvalidKey)?;
        let mut dek = Zeroizing::new([0u8; 32]);
        if dek_bytes.len() != 32 {
            return Err(KeyManagerError::InvalidKey);
        }
        dek.copy_from_slice(&dek_bytes);
        self.live_dek = Some(dek);
        Ok(())
    }

    /// Wipes the live DEK. The `Zeroizing` wrapper ensures the backing bytes
    /// are overwritten on drop.
    pub fn lock(&mut self) {
        self.live_dek = None;
    }

    pub fn encrypt_value(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedBlob, KeyManagerError> {
        let dek = self.live_dek.as_ref().ok_or(KeyManagerError::Locked)?;
        Ok(aead::encrypt(dek, plaintext, aad)?)
    }

    pub fn decrypt_value(&self, blob: &EncryptedBlob, aad: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
        let dek = self.live_dek.as_ref().ok_or(KeyManagerError::Locked)?;
        aead::decrypt(dek, blob, aad).map_err(|_| KeyManagerError::InvalidKey)
    }

    pub fn needs_kdf_upgrade(&self, target_log_n: u8) -> bool {
        self.stored.scrypt_log_n < target_log_n
    }

    /// Re-derives the KEK at a new cost parameter and rewraps the (still
    /// live) DEK under it. Requires the manager to already be unlocked.
    pub fn upgrade_kdf(&mut self, passphrase: &[u8], new_params: ScryptParams) -> Result<(), KeyManagerError> {
        let dek = self
            .live_dek
            .as_ref()
            .ok_or(KeyManagerError::Locked)?
            .to_owned();
        let salt = kdf::random_salt().to_vec();
        let new_kek = kdf::derive_kek(passphrase, &salt, new_params)?;
        let encrypted_dek = aead::encrypt(&new_kek, &*dek, DEK_AAD)?;
        self.stored = StoredKeyMaterial {
            salt,
            encrypted_dek,
            scrypt_log_n: new_params.log_n,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> ScryptParams {
        ScryptParams {
            log_n: 8,
            ..ScryptParams::default()
        }
    }

    #[test]
    fn generate_then_roundtrip_encrypt() {
        let km = KeyManager::generate(b"passphrase", fast_params()).unwrap();
        assert!(km.is_unlocked());
        let blob = km.encrypt_value(b"ssn:123-45-6789", b"token:SSN_1").unwrap();
        let plain = km.decrypt_value(&blob, b"token:SSN_1").unwrap();
        assert_eq!(plain, b"ssn:123-45-6789");
    }

    #[test]
    fn wrong_passphrase_fails_unlock() {
        let km = KeyManager::generate(b"correct", fast_params()).unwrap();
        let stored = km.stored().clone();

        let mut reloaded = KeyManager::from_stored(stored);
        assert!(!reloaded.is_unlocked());
        assert!(matches!(
            reloaded.unlock(b"incorrect"),
            Err(KeyManagerError::InvalidKey)
        ));
        assert!(!reloaded.is_unlocked());
    }

    #[test]
    fn lock_wipes_live_dek_and_blocks_operations() {
        let mut km = KeyManager::generate(b"passphrase", fast_params()).unwrap();
        km.lock();
        assert!(!km.is_unlocked());
        assert!(matches!(
            km.encrypt_value(b"x", b""),
            Err(KeyManagerError::Locked)
        ));
    }

    #[test]
    fn upgrade_kdf_preserves_decryptability() {
        let mut km = KeyManager::generate(b"passphrase", fast_params()).unwrap();
        let blob = km.encrypt_value(b"payload", b"aad").unwrap();

        let new_params = ScryptParams {
            log_n: 9,
            ..ScryptParams::default()
        };
        assert!(km.needs_kdf_upgrade(9));
        km.upgrade_kdf(b"passphrase", new_params).unwrap();
        assert_eq!(km.stored().scrypt_log_n, 9);

        let plain = km.decrypt_value(&blob, b"aad").unwrap();
        assert_eq!(plain, b"payload");
    }
}
