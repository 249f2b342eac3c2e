//! Key derivation: scrypt(N, r=8, p=1) over a passphrase and a per-vault salt.

use rand::RngCore;
use scrypt::{scrypt, Params};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("invalid scrypt parameters: {0}")]
    InvalidParams(String),
    #[error("scrypt derivation failed")]
    DerivationFailed,
}

pub const DEFAULT_SCRYPT_LOG_N: u8 = 15; // N = 2^15 = 32768
pub const SCRYPT_R: u32 = 8;
pub const SCRYPT_P: u32 = 1;
pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ScryptParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_SCRYPT_LOG_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
        }
    }
}

impl ScryptParams {
    pub fn n(&self) -> u64 {
        1u64 << self.log_n as u32
    }
}

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derives a 32-byte KEK from `passphrase` and `salt` under `params`.
pub fn derive_kek(
    passphrase: &[u8],
    salt: &[u8],
    params: ScryptParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, KdfError> {
    let scrypt_params = Params::new(params.log_n, params.r, params.p, KEY_LEN)
        .map_err(|e| KdfError::InvalidParams(e.to_string()))?;
    let mut out = [0u8; KEY_LEN];
    scrypt(passphrase, salt, &scrypt_params, &mut out).map_err(|_| KdfError::DerivationFailed)?;
    Ok(Zeroizing::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_for_same_inputs() {
        let salt = [7u8; SALT_LEN];
        let params = ScryptParams {
            log_n: 10,
            ..Default::default()
        };
        let a = derive_kek(b"correct horse battery staple", &salt, params).unwrap();
        let b = derive_kek(b"correct horse battery staple", &salt, params).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn different_salts_yield_different_keys() {
        let params = ScryptParams {
            log_n: 10,
            ..Default::default()
        };
        let a = derive_kek(b"same passphrase", &[1u8; SALT_LEN], params).unwrap();
        let b = derive_kek(b"same passphrase", &[2u8; SALT_LEN], params).unwrap();
        assert_ne!(*a, *b);
    }
}
