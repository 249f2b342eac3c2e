use crate::db::{Database, StorageError};
use phi_crypto::keymgr::StoredKeyMaterial;
use phi_crypto::aead::EncryptedBlob;

/// Reads and writes the single `vault_meta` row.
pub struct VaultMetaRepo<'a> {
    db: &'a Database,
}

impl<'a> VaultMetaRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn load(&self) -> Result<Option<StoredKeyMaterial>, StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT salt, encrypted_dek, scrypt_log_n FROM vault_meta WHERE id = 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let salt: Vec<u8> = row.get(0)?;
            let encrypted_dek_json: String = row.get(1)?;
            let scrypt_log_n: i64 = row.get(2)?;
            let encrypted_dek: EncryptedBlob = serde_json::from_str(&encrypted_dek_json)?;
            Ok(Some(StoredKeyMaterial {
                salt,
                encrypted_dek,
                scrypt_log_n: scrypt_log_n as u8,
            }))
        } else {
            Ok(None)
        }
    }

    /// Inserts the vault_meta row on first use; fails if one already exists
    /// (there is exactly one vault per database, per spec.md §6).
    pub fn initialize(&self, material: &StoredKeyMaterial) -> Result<(), StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let encrypted_dek_json = serde_json::to_string(&material.encrypted_dek)?;
        conn.execute(
            "INSERT INTO vault_meta (id, salt, encrypted_dek, scrypt_log_n) VALUES (1, ?1, ?2, ?3)",
            rusqlite::params![material.salt, encrypted_dek_json, material.scrypt_log_n as i64],
        )?;
        Ok(())
    }

    /// Replaces the stored key material after a KDF upgrade/rewrap.
    pub fn update(&self, material: &StoredKeyMaterial) -> Result<(), StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let encrypted_dek_json = serde_json::to_string(&material.encrypted_dek)?;
        let changed = conn.execute(
            "UPDATE vault_meta SET salt = ?1, encrypted_dek = ?2, scrypt_log_n = ?3 WHERE id = 1",
            rusqlite::params![material.salt, encrypted_dek_json, material.scrypt_log_n as i64],
        )?;
        if changed == 0 {
            return Err(StorageError::VaultNotInitialized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_crypto::kdf::ScryptParams;
    use phi_crypto::KeyManager;

    #[test]
    fn initialize_then_load_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let repo = VaultMetaRepo::new(&db);
        assert!(repo.load().unwrap().is_none());

        let km = KeyManager::generate(
            b"pw",
            ScryptParams {
                log_n: 8,
                ..Default::default()
            },
        )
        .unwrap();
        repo.initialize(km.stored()).unwrap();

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded.salt, km.stored().salt);
        assert_eq!(loaded.scrypt_log_n, km.stored().scrypt_log_n);
    }
}
