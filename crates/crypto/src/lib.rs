//! phi_crypto
//!
//! Crypto primitives and the KEK/DEK key manager backing the token store's
//! encryption. KDF is scrypt(N, r=8, p=1); AEAD is AES-256-GCM. The live DEK
//! is held only in a `zeroize`-wrapped buffer that is wiped on lock/drop.

pub mod aead;
pub mod kdf;
pub mod keymgr;

pub use aead::{decrypt, encrypt, AeadError, EncryptedBlob};
pub use kdf::{derive_kek, KdfError, ScryptParams};
pub use keymgr::{KeyManager, KeyManagerError, StoredKeyMaterial};
