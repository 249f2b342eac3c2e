//! Token restoration (spec.md §4.8). Grounded directly in
//! `original_source/scrubiq/pipeline/restorer.py`: the token-matching
//! regex is used verbatim, and unknown tokens mask to the generic
//! `[REDACTED]` string rather than any type-revealing placeholder, so a
//! restoration request against a stale or tampered token never discloses
//! what kind of PHI it used to represent.

use once_cell::sync::Lazy;
use phi_crypto::KeyManager;
use phi_storage::{StorageError, TokenStore};
use regex::Regex;
use thiserror::Error;

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([A-Z][A-Z0-9_]*_\d+)\]").unwrap());

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("crypto error: {0}")]
    Crypto(#[from] phi_crypto::KeyManagerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Returns the input unchanged; no token substitution runs at all.
    Redacted,
    /// Each token replaced by its stored Safe Harbor value, or left as
    /// the token itself if none was recorded.
    SafeHarbor,
    /// Each token replaced by the decrypted original plaintext.
    Research,
}

#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub restored: String,
    pub tokens_found: Vec<String>,
    pub tokens_unknown: Vec<String>,
}

/// Restores tokens in `text` per `mode`. `REDACTED` is a pure short-circuit
/// (spec.md §4.8): it does not run the substitution regex at all, matching
/// the source's "no restoration" flag behavior exactly.
pub fn restore(text: &str, store: &TokenStore, km: &KeyManager, mode: RestoreMode) -> Result<RestoreResult, RestoreError> {
    if mode == RestoreMode::Redacted {
        return Ok(RestoreResult { restored: text.to_string(), tokens_found: Vec::new(), tokens_unknown: Vec::new() });
    }

    let mut tokens_found = Vec::new();
    let mut tokens_unknown = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for m in TOKEN_PATTERN.find_iter(text) {
        out.push_str(&text[cursor..m.start()]);
        let token = m.as_str();

        let replacement = match lookup(store, km, token, mode)? {
            Some(value) => {
                tokens_found.push(token.to_string());
                value
            }
            None => {
                tokens_unknown.push(token.to_string());
                // Never reveal the entity type of an unresolvable token.
                "[REDACTED]".to_string()
            }
        };
        out.push_str(&replacement);
        cursor = m.end();
    }
    out.push_str(&text[cursor..]);

    Ok(RestoreResult { restored: out, tokens_found, tokens_unknown })
}

fn lookup(store: &TokenStore, km: &KeyManager, token: &str, mode: RestoreMode) -> Result<Option<String>, RestoreError> {
    let Some(entry) = store.get_entry(token)? else {
        return Ok(None);
    };
    match mode {
        RestoreMode::Redacted => unreachable!("short-circuited above"),
        RestoreMode::SafeHarbor => Ok(Some(entry.safe_harbor.clone().unwrap_or_else(|| token.to_string()))),
        RestoreMode::Research => {
            let plaintext = km.decrypt_value(&entry.ciphertext, token.as_bytes())?;
            Ok(Some(String::from_utf8_lossy(&plaintext).into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_crypto::kdf::ScryptParams;
    use phi_storage::Database;
    use std::sync::Arc;

    fn test_km() -> KeyManager {
        KeyManager::generate(b"pw", ScryptParams { log_n: 8, ..Default::default() }).unwrap()
    }

    #[test]
    fn redacted_mode_returns_input_unchanged() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();
        let result = restore("Patient is [NAME_1].", &store, &km, RestoreMode::Redacted).unwrap();
        assert_eq!(result.restored, "Patient is [NAME_1].");
        assert!(result.tokens_found.is_empty());
    }

    #[test]
    fn research_mode_decrypts_original_value() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();
        let token = store.get_or_create_by_entity(&km, "e1", "John Smith", "john smith", "NAME", None).unwrap();

        let text = format!("Patient is {token}.");
        let result = restore(&text, &store, &km, RestoreMode::Research).unwrap();
        assert_eq!(result.restored, "Patient is John Smith.");
        assert_eq!(result.tokens_found, vec![token]);
    }

    #[test]
    fn safe_harbor_mode_uses_stored_generalization() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();
        let token = store.get_or_create_by_entity(&km, "e1", "91", "91", "AGE", Some("90+")).unwrap();

        let text = format!("Age: {token}.");
        let result = restore(&text, &store, &km, RestoreMode::SafeHarbor).unwrap();
        assert_eq!(result.restored, "Age: 90+.");
    }

    #[test]
    fn unknown_token_masks_without_revealing_type() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = TokenStore::new(db);
        let km = test_km();
        let result = restore("See [SSN_7] for details.", &store, &km, RestoreMode::Research).unwrap();
        assert_eq!(result.restored, "See [REDACTED] for details.");
        assert_eq!(result.tokens_unknown, vec!["[SSN_7]".to_string()]);
    }
}
