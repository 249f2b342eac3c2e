//! phi_audit_spec
//!
//! Strongly-typed audit events for the detection/redaction/restoration engine.
//! Every façade operation in `phi_session` (unlock, lock, redact, restore,
//! review decisions, chain recovery) emits exactly one of these variants.
//! Event payloads never carry PHI: spans are referenced by offset and type,
//! never by surface text; session identifiers are pre-truncated-hashed by
//! the caller before being placed in an event.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    Redacted,
    SafeHarbor,
    Research,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanSummary {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    pub detector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultUnlocked {
    pub session_hash: String,
    pub scrypt_n: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultLocked {
    pub session_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPerformed {
    pub session_hash: String,
    pub input_hash: String,
    pub span_count: usize,
    pub tokens_created: usize,
    pub needs_review: usize,
    pub processing_ms: u64,
    pub spans: Vec<SpanSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationPerformed {
    pub session_hash: String,
    pub mode: PrivacyMode,
    pub tokens_found: usize,
    pub tokens_unknown: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewApproved {
    pub session_hash: String,
    pub review_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRejected {
    pub session_hash: String,
    pub review_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDeleted {
    pub session_hash: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyModeChanged {
    pub session_hash: String,
    pub mode: PrivacyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorOccurred {
    pub session_hash: String,
    pub kind: String,
    pub code: String,
    /// Safe, PHI-free description only.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainForked {
    pub session_hash: String,
    pub forked_after_sequence: u64,
    pub fork_prev_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    VaultUnlocked(VaultUnlocked),
    VaultLocked(VaultLocked),
    RedactionPerformed(RedactionPerformed),
    RestorationPerformed(RestorationPerformed),
    ReviewApproved(ReviewApproved),
    ReviewRejected(ReviewRejected),
    TokenDeleted(TokenDeleted),
    PrivacyModeChanged(PrivacyModeChanged),
    ErrorOccurred(ErrorOccurred),
    ChainForked(ChainForked),
}

impl AuditEvent {
    /// Stable string name used as `event_type` in the hash formula.
    /// Kept separate from the serde tag so the hash input is independent of
    /// how serde happens to render the tag.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            AuditEvent::VaultUnlocked(_) => "VAULT_UNLOCKED",
            AuditEvent::VaultLocked(_) => "VAULT_LOCKED",
            AuditEvent::RedactionPerformed(_) => "REDACTION_PERFORMED",
            AuditEvent::RestorationPerformed(_) => "RESTORATION_PERFORMED",
            AuditEvent::ReviewApproved(_) => "REVIEW_APPROVED",
            AuditEvent::ReviewRejected(_) => "REVIEW_REJECTED",
            AuditEvent::TokenDeleted(_) => "TOKEN_DELETED",
            AuditEvent::PrivacyModeChanged(_) => "PRIVACY_MODE_CHANGED",
            AuditEvent::ErrorOccurred(_) => "ERROR_OCCURRED",
            AuditEvent::ChainForked(_) => "CHAIN_FORK",
        }
    }
}
