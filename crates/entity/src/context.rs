//! Conversation-scoped context for pronoun-resolution hints and salience
//! tracking. NOT an identity system — [`crate::registry::EntityRegistry`]
//! is the only component that decides "who is who"; this just remembers
//! what's been mentioned recently so coref can ask for a hint. Grounded
//! directly in `original_source/scrubiq/pipeline/conversation_context.py`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const MAX_MENTIONS: usize = 100;

fn type_to_slot(entity_type: &str) -> Option<&'static str> {
    match entity_type {
        "NAME" | "NAME_PATIENT" | "NAME_PROVIDER" | "NAME_RELATIVE" | "PERSON" | "PER" => Some("PERSON"),
        "ORG" | "ORGANIZATION" | "EMPLOYER" | "FACILITY" | "COMPANY" => Some("ORG"),
        "ADDRESS" | "CITY" | "STATE" | "ZIP" | "GPS_COORDINATE" | "LOCATION" => Some("LOCATION"),
        "DATE" | "DATE_DOB" | "DOB" => Some("DATE"),
        _ => None,
    }
}

fn base_type(entity_type: &str) -> &str {
    for suffix in ["_PATIENT", "_PROVIDER", "_RELATIVE"] {
        if entity_type.ends_with(suffix) {
            return "NAME";
        }
    }
    entity_type
}

/// Non-PHI metadata keys safe to retain against a token (gender/plurality
/// hints for coref, bookkeeping for confidence/detector provenance).
const SAFE_METADATA_KEYS: &[&str] = &["gender", "is_plural", "is_org", "entity_id", "confidence", "detector", "semantic_role"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionRecord {
    pub token: String,
    pub entity_type: String,
    pub turn: i64,
    pub metadata: HashMap<String, String>,
}

/// Tracks recent token mentions, per-category focus slots, and token
/// metadata for one conversation. Contains no PHI — only tokens and the
/// metadata keys in [`SAFE_METADATA_KEYS`] — so it's safe to serialize
/// into session state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub conversation_id: String,
    recent_mentions: Vec<MentionRecord>,
    focus: HashMap<String, String>,
    token_metadata: HashMap<String, HashMap<String, String>>,
    tokens: HashSet<String>,
    pub current_turn: i64,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), conversation_id: conversation_id.into(), ..Default::default() }
    }

    /// Records that `token` was mentioned. Called after the registry has
    /// resolved identity and the token store has assigned a token — this
    /// method only observes, it never decides identity.
    pub fn observe(&mut self, token: &str, entity_type: &str, metadata: HashMap<String, String>) {
        self.tokens.insert(token.to_string());

        self.recent_mentions.push(MentionRecord {
            token: token.to_string(),
            entity_type: entity_type.to_string(),
            turn: self.current_turn,
            metadata: metadata.clone(),
        });
        if self.recent_mentions.len() > MAX_MENTIONS {
            let excess = self.recent_mentions.len() - MAX_MENTIONS;
            self.recent_mentions.drain(0..excess);
        }

        let safe_metadata: HashMap<String, String> =
            metadata.into_iter().filter(|(k, _)| SAFE_METADATA_KEYS.contains(&k.as_str())).collect();
        let entry = self.token_metadata.entry(token.to_string()).or_insert_with(|| {
            let mut m = HashMap::new();
            m.insert("type".to_string(), entity_type.to_string());
            m.insert("turn_first_seen".to_string(), self.current_turn.to_string());
            m
        });
        entry.extend(safe_metadata);
        entry.insert("turn_last_seen".to_string(), self.current_turn.to_string());

        if let Some(slot) = type_to_slot(entity_type) {
            self.focus.insert(slot.to_string(), token.to_string());
        }
    }

    pub fn get_focus(&self, slot: &str) -> Option<&str> {
        self.focus.get(slot).map(String::as_str)
    }

    /// Tokens of `entity_type` (or its base type) mentioned within the
    /// last `max_turns_back` turns, most recent first, de-duplicated.
    pub fn get_recent(&self, entity_type: &str, max_turns_back: i64) -> Vec<String> {
        let cutoff = self.current_turn - max_turns_back;
        let mut seen = HashSet::new();
        let mut recent = Vec::new();
        for record in self.recent_mentions.iter().rev() {
            if record.turn < cutoff {
                break;
            }
            if (record.entity_type == entity_type || base_type(&record.entity_type) == entity_type) && seen.insert(record.token.clone())
            {
                recent.push(record.token.clone());
            }
        }
        recent
    }

    pub fn get_token_metadata(&self, token: &str) -> Option<&HashMap<String, String>> {
        self.token_metadata.get(token)
    }

    pub fn get_gender(&self, token: &str) -> Option<&str> {
        self.token_metadata.get(token)?.get("gender").map(String::as_str)
    }

    pub fn get_recent_by_gender(&self, gender: &str, max_turns_back: i64) -> Option<String> {
        let cutoff = self.current_turn - max_turns_back;
        const PERSON_TYPES: &[&str] = &["NAME", "NAME_PATIENT", "NAME_PROVIDER", "NAME_RELATIVE", "PERSON"];

        for record in self.recent_mentions.iter().rev() {
            if record.turn < cutoff {
                break;
            }
            if PERSON_TYPES.contains(&record.entity_type.as_str()) || PERSON_TYPES.contains(&base_type(&record.entity_type)) {
                if let Some(meta) = self.token_metadata.get(&record.token) {
                    if meta.get("gender").map(String::as_str) == Some(gender) {
                        return Some(record.token.clone());
                    }
                }
            }
        }
        None
    }

    pub fn get_all_tokens(&self) -> HashSet<String> {
        self.tokens.clone()
    }

    pub fn advance_turn(&mut self) {
        self.current_turn += 1;
    }

    pub fn clear(&mut self) {
        self.recent_mentions.clear();
        self.focus.clear();
        self.token_metadata.clear();
        self.tokens.clear();
        self.current_turn = 0;
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_updates_focus_slot() {
        let mut ctx = ConversationContext::new("s1", "c1");
        ctx.observe("[NAME_1]", "NAME_PATIENT", HashMap::new());
        assert_eq!(ctx.get_focus("PERSON"), Some("[NAME_1]"));
    }

    #[test]
    fn get_recent_respects_turn_window() {
        let mut ctx = ConversationContext::new("s1", "c1");
        ctx.observe("[NAME_1]", "NAME", HashMap::new());
        ctx.advance_turn();
        ctx.advance_turn();
        ctx.advance_turn();
        ctx.observe("[NAME_2]", "NAME", HashMap::new());

        let recent = ctx.get_recent("NAME", 1);
        assert_eq!(recent, vec!["[NAME_2]".to_string()]);
    }

    #[test]
    fn gender_metadata_is_retained_and_queryable() {
        let mut ctx = ConversationContext::new("s1", "c1");
        let mut meta = HashMap::new();
        meta.insert("gender".to_string(), "F".to_string());
        ctx.observe("[NAME_1]", "NAME_PATIENT", meta);
        assert_eq!(ctx.get_gender("[NAME_1]"), Some("F"));
        assert_eq!(ctx.get_recent_by_gender("F", 2), Some("[NAME_1]".to_string()));
    }

    #[test]
    fn serialization_round_trips() {
        let mut ctx = ConversationContext::new("s1", "c1");
        ctx.observe("[NAME_1]", "NAME", HashMap::new());
        let json = serde_json::to_string(&ctx).unwrap();
        let restored: ConversationContext = serde_json::from_str(&json).unwrap();
        assert!(restored.contains("[NAME_1]"));
    }
}
