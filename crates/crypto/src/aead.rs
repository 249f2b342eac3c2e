//! AES-256-GCM authenticated encryption with associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed: ciphertext authentication (MAC) check failed")]
    DecryptFailed,
}

/// A self-contained ciphertext: nonce + AEAD-sealed bytes (tag included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedBlob, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| AeadError::EncryptFailed)?;

    Ok(EncryptedBlob {
        nonce: nonce_bytes,
        ciphertext,
    })
}

pub fn decrypt(key: &[u8; 32], blob: &EncryptedBlob, aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&blob.nonce);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &blob.ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [1u8; 32];
        let blob = encrypt(&key, b"hello phi", b"ctx").unwrap();
        let plain = decrypt(&key, &blob, b"ctx").unwrap();
        assert_eq!(plain, b"hello phi");
    }

    #[test]
    fn wrong_aad_fails_authentication() {
        let key = [2u8; 32];
        let blob = encrypt(&key, b"hello", b"ctx-a").unwrap();
        assert!(decrypt(&key, &blob, b"ctx-b").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = [3u8; 32];
        let mut blob = encrypt(&key, b"hello", b"").unwrap();
        let last = blob.ciphertext.len() - 1;
        blob.ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &blob, b"").is_err());
    }
}
