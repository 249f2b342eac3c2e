//! Token Store: `entity_id -> token` and `token -> (entity_type,
//! ciphertext(plaintext), safe_harbor_value, created_at)`, per spec.md §4.7.
//! Counter allocation for minting new tokens is serialized through the same
//! database write lock that guards every other table, so concurrent
//! `redact` calls registering the same new entity observe a single winner
//! for the counter increment (spec.md §5's token-store ordering guarantee).

use crate::db::{Database, StorageError};
use chrono::{DateTime, Utc};
use phi_common::sha256_hex;
use phi_crypto::aead::EncryptedBlob;
use phi_crypto::KeyManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub entity_type: String,
    pub ciphertext: EncryptedBlob,
    pub safe_harbor: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct TokenStore {
    db: Arc<Database>,
}

fn normalized_value_hash(entity_type: &str, normalized_value: &str) -> String {
    sha256_hex(format!("{}:{}", entity_type, normalized_value).as_bytes())
}

impl TokenStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the existing token for `entity_id`, or mints a new one.
    /// `value` is the plaintext surface to encrypt under the session DEK;
    /// `safe_harbor` is stored in clear (non-identifying by construction).
    pub fn get_or_create_by_entity(
        &self,
        km: &KeyManager,
        entity_id: &str,
        value: &str,
        normalized_value: &str,
        entity_type: &str,
        safe_harbor: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut conn = self.db.conn.lock().expect("db mutex poisoned");
        let tx = conn.transaction()?;

        if let Some(token) = tx.query_row(
            "SELECT token FROM entity_token_map WHERE entity_id = ?1",
            rusqlite::params![entity_id],
            |row| row.get::<_, String>(0),
        ).ok() {
            tx.commit()?;
            return Ok(token);
        }

        let next: i64 = tx.query_row(
            "INSERT INTO token_counters (entity_type, counter) VALUES (?1, 1)
             ON CONFLICT(entity_type) DO UPDATE SET counter = counter + 1
             RETURNING counter",
            rusqlite::params![entity_type],
            |row| row.get(0),
        )?;
        let token = format!("[{}_{}]", entity_type, next);

        let ciphertext = km.encrypt_value(value.as_bytes(), token.as_bytes())?;
        let ciphertext_json = serde_json::to_string(&ciphertext)?;
        let created_at = Utc::now();
        let vhash = normalized_value_hash(entity_type, normalized_value);

        tx.execute(
            "INSERT INTO tokens (token, entity_type, ciphertext, safe_harbor, created_at, normalized_value_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                token,
                entity_type,
                ciphertext_json,
                safe_harbor,
                created_at.to_rfc3339(),
                vhash,
            ],
        )?;
        tx.execute(
            "INSERT INTO entity_token_map (entity_id, token) VALUES (?1, ?2)",
            rusqlite::params![entity_id, token],
        )?;
        tx.commit()?;
        Ok(token)
    }

    pub fn list_tokens(&self) -> Result<Vec<TokenEntry>, StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT token, entity_type, ciphertext, safe_harbor, created_at FROM tokens ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            let ciphertext_json: String = row.get(2)?;
            let created_at: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                ciphertext_json,
                row.get::<_, Option<String>>(3)?,
                created_at,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (token, entity_type, ciphertext_json, safe_harbor, created_at) = row?;
            let ciphertext: EncryptedBlob = serde_json::from_str(&ciphertext_json)?;
            out.push(TokenEntry {
                token,
                entity_type,
                ciphertext,
                safe_harbor,
                created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(out)
    }

    pub fn get_entry(&self, token: &str) -> Result<Option<TokenEntry>, StorageError> {
        Ok(self.list_tokens()?.into_iter().find(|e| e.token == token))
    }

    pub fn delete(&self, token: &str) -> Result<bool, StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let changed = conn.execute("DELETE FROM tokens WHERE token = ?1", rusqlite::params![token])?;
        conn.execute(
            "DELETE FROM entity_token_map WHERE token = ?1",
            rusqlite::params![token],
        )?;
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn decrypt_entry(&self, km: &KeyManager, token: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.get_entry(token)? {
            Some(entry) => Ok(Some(km.decrypt_value(&entry.ciphertext, token.as_bytes())?)),
            None => Ok(None),
        }
    }

    pub fn find_token_by_normalized(
        &self,
        entity_type: &str,
        normalized_value: &str,
    ) -> Result<Option<String>, StorageError> {
        let vhash = normalized_value_hash(entity_type, normalized_value);
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let token = conn
            .query_row(
                "SELECT token FROM tokens WHERE entity_type = ?1 AND normalized_value_hash = ?2",
                rusqlite::params![entity_type, vhash],
                |row| row.get::<_, String>(0),
            )
            .ok();
        Ok(token)
    }

    /// Records an observed surface variant for `entity_id`, used to seed the
    /// known-entity pre-pass across conversation turns (spec.md §4.3).
    pub fn record_variant(&self, entity_id: &str, surface: &str, entity_type: &str) -> Result<(), StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO entity_variants (entity_id, variant_surface, entity_type) VALUES (?1, ?2, ?3)",
            rusqlite::params![entity_id, surface, entity_type],
        )?;
        Ok(())
    }

    pub fn known_entities(&self) -> Result<Vec<(String, String, String)>, StorageError> {
        let conn = self.db.conn.lock().expect("db mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT entity_id, variant_surface, entity_type FROM entity_variants")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_crypto::kdf::ScryptParams;

    fn test_km() -> KeyManager {
        KeyManager::generate(
            b"pw",
            ScryptParams {
                log_n: 8,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn same_entity_gets_same_token_across_calls() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();

        let t1 = store
            .get_or_create_by_entity(&km, "entity-1", "John Smith", "john smith", "NAME", None)
            .unwrap();
        let t2 = store
            .get_or_create_by_entity(&km, "entity-1", "John Smith", "john smith", "NAME", None)
            .unwrap();
        assert_eq!(t1, t2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn distinct_entities_get_monotonic_per_type_counters() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();

        let t1 = store
            .get_or_create_by_entity(&km, "e1", "John Smith", "john smith", "NAME", None)
            .unwrap();
        let t2 = store
            .get_or_create_by_entity(&km, "e2", "Jane Doe", "jane doe", "NAME", None)
            .unwrap();
        assert_eq!(t1, "[NAME_1]");
        assert_eq!(t2, "[NAME_2]");
    }

    #[test]
    fn decrypt_entry_recovers_plaintext() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();

        let token = store
            .get_or_create_by_entity(&km, "e1", "123-45-6789", "123-45-6789", "SSN", Some("[SSN_1]"))
            .unwrap();
        let plain = store.decrypt_entry(&km, &token).unwrap().unwrap();
        assert_eq!(plain, b"123-45-6789");
    }

    #[test]
    fn delete_removes_token() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();
        let token = store
            .get_or_create_by_entity(&km, "e1", "v", "v", "NAME", None)
            .unwrap();
        assert!(store.delete(&token).unwrap());
        assert!(store.get_entry(&token).unwrap().is_none());
    }
}
