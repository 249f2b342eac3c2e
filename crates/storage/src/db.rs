use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] phi_crypto::KeyManagerError),
    #[error("vault_meta row missing; vault is not initialized")]
    VaultNotInitialized,
    #[error("transaction conflict after {0} retries")]
    TransactionConflict(u32),
    #[error("token not found: {0}")]
    TokenNotFound(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault_meta (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    salt            BLOB NOT NULL,
    encrypted_dek   TEXT NOT NULL,
    scrypt_log_n    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token                   TEXT PRIMARY KEY,
    entity_type             TEXT NOT NULL,
    ciphertext              TEXT NOT NULL,
    safe_harbor             TEXT,
    created_at              TEXT NOT NULL,
    normalized_value_hash   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_type_value
    ON tokens (entity_type, normalized_value_hash);

CREATE TABLE IF NOT EXISTS entity_token_map (
    entity_id   TEXT PRIMARY KEY,
    token       TEXT NOT NULL REFERENCES tokens(token)
);

CREATE TABLE IF NOT EXISTS token_counters (
    entity_type TEXT PRIMARY KEY,
    counter     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS entity_variants (
    entity_id       TEXT NOT NULL,
    variant_surface TEXT NOT NULL,
    entity_type     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_variants_surface ON entity_variants (variant_surface);
"#;

/// A single SQLite-backed vault database. The connection is guarded by a
/// mutex: all writes are serialized through it, matching spec.md §5's
/// "Database layer serializes writes via a single writer lock."
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_creates_expected_tables() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert!(names.contains(&"vault_meta".to_string()));
        assert!(names.contains(&"tokens".to_string()));
        assert!(names.contains(&"entity_variants".to_string()));
    }
}
