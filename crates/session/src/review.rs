//! Review item surfaced for low-confidence or conflicted entity merges
//! (spec.md §3 "Review item"). Never carries plaintext; `redacted_context`
//! is the already-tokenized surrounding text.

use phi_entity::registry::MergeCandidate;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReviewItem {
    pub id: String,
    pub token: Option<String>,
    pub entity_type: String,
    pub confidence: f64,
    pub reason: String,
    pub redacted_context: String,
    pub suggested_action: String,
}

impl ReviewItem {
    pub fn from_candidate(candidate: &MergeCandidate, entity_type: String, redacted_context: String) -> Self {
        let suggested_action = if candidate.reason.starts_with("blocked:") {
            "create_new_entity".to_string()
        } else {
            "confirm_merge".to_string()
        };
        Self {
            id: format!("{}->{}", candidate.candidate_entity_id, candidate.target_entity_id),
            token: None,
            entity_type,
            confidence: candidate.confidence,
            reason: candidate.reason.clone(),
            redacted_context,
            suggested_action,
        }
    }
}
