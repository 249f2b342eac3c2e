//! Cross-call entity identity authority (spec.md §4.5). The only component
//! that mints entity IDs; [`crate::resolver`] only groups spans within a
//! single call, then hands provisional entities here to decide whether
//! they're new or merge with something already registered. Grounded
//! directly in `original_source/scrubiq/services/entity_registry.py`,
//! including its exact confidence/penalty/threshold constants.

use phi_detect::Span;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const EXACT_CONFIDENCE: f64 = 0.99;
pub const COREF_CONFIDENCE: f64 = 0.95;
pub const SUBSET_MULTI_CONFIDENCE: f64 = 0.85;
pub const KNOWN_EXACT_CONFIDENCE: f64 = 0.90;
pub const KNOWN_PARTIAL_CONFIDENCE: f64 = 0.75;
pub const WORD_OVERLAP_CONFIDENCE: f64 = 0.60;
pub const SINGLE_WORD_CONFIDENCE: f64 = 0.40;

pub const AUTO_MERGE_THRESHOLD: f64 = 0.90;
pub const FLAG_MERGE_THRESHOLD: f64 = 0.70;

pub const ROLE_CONFLICT_PENALTY: f64 = 0.50;
pub const SENTENCE_DISTANCE_PENALTY: f64 = 0.20;
pub const SENTENCE_DISTANCE_THRESHOLD: i64 = 5;
pub const TYPE_MISMATCH_PENALTY: f64 = 0.30;

const NAME_PREFIXES: &[&str] = &["mr", "mrs", "ms", "miss", "dr", "prof", "sr", "jr", "rev"];

const NAME_TYPES: &[&str] = &["NAME", "NAME_PATIENT", "NAME_PROVIDER", "NAME_RELATIVE", "PERSON", "PER"];

/// Types that only merge on exact normalized match — no partial/fuzzy
/// matching, since a false merge here (two different SSNs, two different
/// IP addresses) is far more dangerous than a missed merge.
pub const ISOLATED_TYPES: &[&str] = &[
    "SSN", "SSN_PARTIAL", "MRN", "NPI", "DEA", "CREDIT_CARD", "ACCOUNT_NUMBER", "IBAN", "DRIVER_LICENSE", "PASSPORT",
    "STATE_ID", "EMAIL", "PHONE", "FAX", "IP_ADDRESS", "MAC_ADDRESS", "VIN", "LICENSE_PLATE", "API_KEY", "SECRET",
    "PASSWORD", "DATE", "DATE_DOB", "ADDRESS", "ZIP",
];

fn get_base_type(entity_type: &str) -> String {
    for suffix in ["_PATIENT", "_PROVIDER", "_RELATIVE"] {
        if entity_type.ends_with(suffix) {
            return "NAME".to_string();
        }
    }
    entity_type.to_string()
}

fn infer_role(entity_type: &str) -> String {
    if entity_type.ends_with("_PATIENT") {
        "patient".to_string()
    } else if entity_type.ends_with("_PROVIDER") {
        "provider".to_string()
    } else if entity_type.ends_with("_RELATIVE") {
        "relative".to_string()
    } else {
        "unknown".to_string()
    }
}

fn normalize_value(text: &str, entity_type: &str) -> String {
    let text = text.to_lowercase();
    let base = get_base_type(entity_type);
    if NAME_TYPES.contains(&entity_type) || NAME_TYPES.contains(&base.as_str()) {
        let mut parts: Vec<&str> = text.split_whitespace().collect();
        if let Some(first) = parts.first() {
            if NAME_PREFIXES.contains(&first.trim_end_matches('.')) {
                parts.remove(0);
            }
        }
        parts.join(" ")
    } else {
        text
    }
}

fn get_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .replace('.', "")
        .split_whitespace()
        .filter(|w| w.len() >= 2 && !NAME_PREFIXES.contains(w))
        .map(String::from)
        .collect()
}

/// Context accompanying a registration: the caller's view of semantic
/// role and position, used for conflict/distance penalties.
#[derive(Debug, Clone, Default)]
pub struct RegisterContext {
    pub semantic_role: Option<String>,
    pub sentence_idx: Option<i64>,
    pub conversation_id: Option<String>,
}

/// A proposed mention to register.
#[derive(Debug, Clone)]
pub struct EntityCandidate {
    pub text: String,
    pub entity_type: String,
    pub span_start: usize,
    pub span_end: usize,
    pub span_confidence: f64,
    pub coref_anchor_value: Option<String>,
    pub context: RegisterContext,
}

impl EntityCandidate {
    pub fn from_span(span: &Span, context: RegisterContext) -> Self {
        Self {
            text: span.text.clone(),
            entity_type: span.entity_type.clone(),
            span_start: span.start,
            span_end: span.end,
            span_confidence: span.confidence,
            coref_anchor_value: span.coref_anchor_value.clone(),
            context,
        }
    }
}

#[derive(Debug, Clone)]
struct MentionRecord {
    text: String,
    start: usize,
    end: usize,
    role: String,
    confidence: f64,
    conversation_id: Option<String>,
    sentence_idx: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RegisteredEntity {
    pub id: String,
    pub entity_type: String,
    pub canonical_value: String,
    normalized_value: String,
    words: HashSet<String>,
    mentions: Vec<MentionRecord>,
    pub roles: HashSet<String>,
}

impl RegisteredEntity {
    pub fn has_conflicting_role(&self, role: &str) -> bool {
        if role == "unknown" || self.roles.is_empty() {
            return false;
        }
        (role == "patient" && self.roles.contains("provider")) || (role == "provider" && self.roles.contains("patient"))
    }

    pub fn mention_count(&self) -> usize {
        self.mentions.len()
    }
}

/// A flagged or blocked potential merge awaiting operator review.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub candidate_entity_id: String,
    pub target_entity_id: String,
    pub confidence: f64,
    pub reason: String,
}

struct RegistryState {
    entities: HashMap<String, RegisteredEntity>,
    by_normalized: HashMap<String, HashSet<String>>,
    by_word: HashMap<String, HashSet<String>>,
    by_type: HashMap<String, HashSet<String>>,
    review_queue: Vec<MergeCandidate>,
}

/// The single source of truth for entity identity across calls within a
/// session. Holds in-memory indexes (not persisted — [`phi_storage`]'s
/// `entity_token_map` is the durable entity-to-token mapping); guarded by
/// a plain `Mutex` since every public method locks exactly once per call
/// and never re-enters itself, unlike the Python original's `RLock`.
pub struct EntityRegistry {
    state: Mutex<RegistryState>,
    auto_merge_threshold: f64,
    flag_merge_threshold: f64,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::with_thresholds(AUTO_MERGE_THRESHOLD, FLAG_MERGE_THRESHOLD)
    }

    pub fn with_thresholds(auto_merge_threshold: f64, flag_merge_threshold: f64) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entities: HashMap::new(),
                by_normalized: HashMap::new(),
                by_word: HashMap::new(),
                by_type: HashMap::new(),
                review_queue: Vec::new(),
            }),
            auto_merge_threshold,
            flag_merge_threshold,
        }
    }

    /// Registers a mention, returning the entity ID it belongs to. This is
    /// the only way to obtain an entity ID; the registry decides whether
    /// to mint a new one or merge into an existing entity.
    pub fn register(&self, candidate: EntityCandidate) -> String {
        let mut state = self.state.lock().unwrap();
        let base_type = get_base_type(&candidate.entity_type);
        let normalized = normalize_value(&candidate.text, &candidate.entity_type);
        let role = candidate.context.semantic_role.clone().unwrap_or_else(|| infer_role(&candidate.entity_type));

        let matches = Self::find_merge_candidates(&state, &candidate, &normalized, &base_type);
        if matches.is_empty() {
            return Self::create_entity(&mut state, &candidate, normalized, base_type, role);
        }

        let (best_entity_id, confidence, reason) = Self::select_best_match(&state, &candidate, &matches, &role);
        let Some(best_entity_id) = best_entity_id else {
            return Self::create_entity(&mut state, &candidate, normalized, base_type, role);
        };

        if confidence >= self.auto_merge_threshold {
            Self::merge_into(&mut state, &candidate, &best_entity_id, &role)
        } else if confidence >= self.flag_merge_threshold {
            let entity_id = Self::merge_into(&mut state, &candidate, &best_entity_id, &role);
            state.review_queue.push(MergeCandidate {
                candidate_entity_id: String::new(),
                target_entity_id: best_entity_id,
                confidence,
                reason: format!("auto_merged_flagged:{reason}"),
            });
            entity_id
        } else {
            let entity_id = Self::create_entity(&mut state, &candidate, normalized, base_type, role);
            state.review_queue.push(MergeCandidate {
                candidate_entity_id: entity_id.clone(),
                target_entity_id: best_entity_id,
                confidence,
                reason: format!("blocked:{reason}"),
            });
            entity_id
        }
    }

    fn find_merge_candidates(
        state: &RegistryState,
        candidate: &EntityCandidate,
        normalized: &str,
        base_type: &str,
    ) -> Vec<(String, f64, String)> {
        let mut candidates = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(eids) = state.by_normalized.get(normalized) {
            for eid in eids {
                let entity = &state.entities[eid];
                if get_base_type(&entity.entity_type) == base_type {
                    candidates.push((eid.clone(), EXACT_CONFIDENCE, "exact_match".to_string()));
                    seen.insert(eid.clone());
                }
            }
        }

        if let Some(anchor) = &candidate.coref_anchor_value {
            let anchor_norm = normalize_value(anchor, &candidate.entity_type);
            if let Some(eids) = state.by_normalized.get(&anchor_norm) {
                for eid in eids {
                    if seen.contains(eid) {
                        continue;
                    }
                    let entity = &state.entities[eid];
                    if get_base_type(&entity.entity_type) == base_type {
                        candidates.push((eid.clone(), COREF_CONFIDENCE, "coref_anchor".to_string()));
                        seen.insert(eid.clone());
                    }
                }
            }
        }

        if (NAME_TYPES.contains(&base_type) || NAME_TYPES.contains(&candidate.entity_type.as_str()))
            && !ISOLATED_TYPES.contains(&base_type)
        {
            let words = get_words(&candidate.text);
            if !words.is_empty() {
                let mut candidate_eids: HashSet<String> = HashSet::new();
                for word in &words {
                    if let Some(eids) = state.by_word.get(word) {
                        candidate_eids.extend(eids.iter().cloned());
                    }
                }

                for eid in candidate_eids {
                    if seen.contains(&eid) {
                        continue;
                    }
                    let entity = &state.entities[&eid];
                    if get_base_type(&entity.entity_type) != base_type {
                        continue;
                    }
                    let overlap: HashSet<&String> = words.intersection(&entity.words).collect();
                    if overlap.is_empty() {
                        continue;
                    }
                    let (smaller, larger) =
                        if words.len() <= entity.words.len() { (&words, &entity.words) } else { (&entity.words, &words) };

                    if smaller.is_subset(larger) {
                        if smaller.len() >= 2 {
                            candidates.push((eid, SUBSET_MULTI_CONFIDENCE, "multi_word_subset".to_string()));
                        } else {
                            candidates.push((eid, SINGLE_WORD_CONFIDENCE, "single_word_match".to_string()));
                        }
                    } else {
                        let overlap_ratio = overlap.len() as f64 / words.len().max(entity.words.len()) as f64;
                        if overlap_ratio >= 0.5 {
                            candidates.push((
                                eid,
                                WORD_OVERLAP_CONFIDENCE * overlap_ratio,
                                format!("word_overlap_{}", overlap.len()),
                            ));
                        }
                    }
                }
            }
        }

        candidates
    }

    fn select_best_match(
        state: &RegistryState,
        candidate: &EntityCandidate,
        matches: &[(String, f64, String)],
        role: &str,
    ) -> (Option<String>, f64, String) {
        let mut best_entity: Option<String> = None;
        let mut best_score = 0.0;
        let mut best_reason = String::new();

        for (eid, base_score, reason) in matches {
            let entity = &state.entities[eid];
            let mut score = *base_score;
            let mut reason = reason.clone();

            if (role == "patient" || role == "provider") && entity.has_conflicting_role(role) {
                score -= ROLE_CONFLICT_PENALTY;
                reason.push_str("+role_conflict");
            }

            if let Some(candidate_sent) = candidate.context.sentence_idx {
                if entity.mentions.iter().any(|m| {
                    m.sentence_idx.map(|s| (candidate_sent - s).abs() >= SENTENCE_DISTANCE_THRESHOLD).unwrap_or(false)
                }) {
                    score -= SENTENCE_DISTANCE_PENALTY;
                    reason.push_str("+distant");
                }
            }

            if get_base_type(&entity.entity_type) != get_base_type(&candidate.entity_type) {
                score -= TYPE_MISMATCH_PENALTY;
                reason.push_str("+type_mismatch");
            }

            if score > best_score {
                best_score = score;
                best_entity = Some(eid.clone());
                best_reason = reason;
            }
        }

        (best_entity, best_score, best_reason)
    }

    fn create_entity(
        state: &mut RegistryState,
        candidate: &EntityCandidate,
        normalized: String,
        base_type: String,
        role: String,
    ) -> String {
        let entity_id = uuid::Uuid::new_v4().to_string();
        let words = if NAME_TYPES.contains(&base_type.as_str()) { get_words(&candidate.text) } else { HashSet::new() };

        let mut entity = RegisteredEntity {
            id: entity_id.clone(),
            entity_type: base_type.clone(),
            canonical_value: candidate.text.clone(),
            normalized_value: normalized.clone(),
            words: words.clone(),
            mentions: Vec::new(),
            roles: if role != "unknown" { [role.clone()].into_iter().collect() } else { HashSet::new() },
        };
        entity.mentions.push(MentionRecord {
            text: candidate.text.clone(),
            start: candidate.span_start,
            end: candidate.span_end,
            role,
            confidence: candidate.span_confidence,
            conversation_id: candidate.context.conversation_id.clone(),
            sentence_idx: candidate.context.sentence_idx,
        });

        state.by_normalized.entry(normalized).or_default().insert(entity_id.clone());
        for word in &words {
            state.by_word.entry(word.clone()).or_default().insert(entity_id.clone());
        }
        state.by_type.entry(base_type).or_default().insert(entity_id.clone());
        state.entities.insert(entity_id.clone(), entity);

        tracing::debug!(entity_id = %entity_id, "created new entity");
        entity_id
    }

    fn merge_into(state: &mut RegistryState, candidate: &EntityCandidate, target_id: &str, role: &str) -> String {
        let new_words = get_words(&candidate.text);
        let target_entity_type = state.entities[target_id].entity_type.clone();
        let is_name_type = NAME_TYPES.contains(&target_entity_type.as_str());

        let target = state.entities.get_mut(target_id).unwrap();
        target.mentions.push(MentionRecord {
            text: candidate.text.clone(),
            start: candidate.span_start,
            end: candidate.span_end,
            role: role.to_string(),
            confidence: candidate.span_confidence,
            conversation_id: candidate.context.conversation_id.clone(),
            sentence_idx: candidate.context.sentence_idx,
        });
        if role != "unknown" {
            target.roles.insert(role.to_string());
        }

        let mut old_normalized = None;
        if candidate.text.len() > target.canonical_value.len() {
            old_normalized = Some(target.normalized_value.clone());
            target.canonical_value = candidate.text.clone();
            target.normalized_value = normalize_value(&candidate.text, &candidate.entity_type);
        }
        if is_name_type {
            target.words.extend(new_words.clone());
        }
        let new_normalized = target.normalized_value.clone();

        if let Some(old_norm) = old_normalized {
            if old_norm != new_normalized {
                if let Some(set) = state.by_normalized.get_mut(&old_norm) {
                    set.remove(target_id);
                }
                state.by_normalized.entry(new_normalized).or_default().insert(target_id.to_string());
            }
        }
        if is_name_type {
            for word in new_words {
                state.by_word.entry(word).or_default().insert(target_id.to_string());
            }
        }

        tracing::debug!(entity_id = %target_id, "merged mention into entity");
        target_id.to_string()
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<RegisteredEntity> {
        self.state.lock().unwrap().entities.get(entity_id).cloned()
    }

    pub fn get_entities_by_type(&self, entity_type: &str) -> Vec<RegisteredEntity> {
        let state = self.state.lock().unwrap();
        let base = get_base_type(entity_type);
        state
            .by_type
            .get(&base)
            .map(|eids| eids.iter().filter_map(|eid| state.entities.get(eid).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn get_review_queue(&self) -> Vec<MergeCandidate> {
        self.state.lock().unwrap().review_queue.clone()
    }

    pub fn approve_merge(&self, candidate_entity_id: &str, target_entity_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.entities.contains_key(candidate_entity_id) || !state.entities.contains_key(target_entity_id) {
            return false;
        }
        let candidate = state.entities.remove(candidate_entity_id).unwrap();

        for word in &candidate.words {
            if let Some(set) = state.by_word.get_mut(word) {
                set.remove(candidate_entity_id);
            }
        }
        if let Some(set) = state.by_normalized.get_mut(&candidate.normalized_value) {
            set.remove(candidate_entity_id);
        }
        if let Some(set) = state.by_type.get_mut(&candidate.entity_type) {
            set.remove(candidate_entity_id);
        }

        let target = state.entities.get_mut(target_entity_id).unwrap();
        for mention in &candidate.mentions {
            if mention.role != "unknown" {
                target.roles.insert(mention.role.clone());
            }
        }
        target.mentions.extend(candidate.mentions.clone());
        if candidate.canonical_value.len() > target.canonical_value.len() {
            let old_norm = target.normalized_value.clone();
            target.canonical_value = candidate.canonical_value.clone();
            target.normalized_value = candidate.normalized_value.clone();
            let new_norm = target.normalized_value.clone();
            if old_norm != new_norm {
                if let Some(set) = state.by_normalized.get_mut(&old_norm) {
                    set.remove(target_entity_id);
                }
                state.by_normalized.entry(new_norm).or_default().insert(target_entity_id.to_string());
            }
        }
        target.words.extend(candidate.words.clone());
        for word in &candidate.words {
            state.by_word.entry(word.clone()).or_default().insert(target_entity_id.to_string());
        }

        state.review_queue.retain(|m| m.candidate_entity_id != candidate_entity_id);
        tracing::info!(candidate_entity_id, target_entity_id, "approved merge");
        true
    }

    pub fn reject_merge(&self, candidate_entity_id: &str, target_entity_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.review_queue.len();
        state
            .review_queue
            .retain(|m| !(m.candidate_entity_id == candidate_entity_id && m.target_entity_id == target_entity_id));
        before != state.review_queue.len()
    }

    pub fn export_known_entities(&self) -> HashMap<String, (String, String)> {
        let state = self.state.lock().unwrap();
        state.entities.iter().map(|(eid, e)| (eid.clone(), (e.canonical_value.clone(), e.entity_type.clone()))).collect()
    }

    pub fn import_known_entities(&self, known: &HashMap<String, (String, String)>) {
        let mut state = self.state.lock().unwrap();
        for (eid, (value, etype)) in known {
            if state.entities.contains_key(eid) {
                continue;
            }
            let base_type = get_base_type(etype);
            let normalized = normalize_value(value, etype);
            let words = if NAME_TYPES.contains(&base_type.as_str()) { get_words(value) } else { HashSet::new() };

            let entity = RegisteredEntity {
                id: eid.clone(),
                entity_type: base_type.clone(),
                canonical_value: value.clone(),
                normalized_value: normalized.clone(),
                words: words.clone(),
                mentions: Vec::new(),
                roles: HashSet::new(),
            };
            state.by_normalized.entry(normalized).or_default().insert(eid.clone());
            for word in &words {
                state.by_word.entry(word.clone()).or_default().insert(eid.clone());
            }
            state.by_type.entry(base_type).or_default().insert(eid.clone());
            state.entities.insert(eid.clone(), entity);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entities.clear();
        state.by_normalized.clear();
        state.by_word.clear();
        state.by_type.clear();
        state.review_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, entity_type: &str) -> EntityCandidate {
        EntityCandidate {
            text: text.to_string(),
            entity_type: entity_type.to_string(),
            span_start: 0,
            span_end: text.len(),
            span_confidence: 0.9,
            coref_anchor_value: None,
            context: RegisterContext::default(),
        }
    }

    #[test]
    fn exact_match_auto_merges() {
        let registry = EntityRegistry::new();
        let id1 = registry.register(candidate("John Smith", "NAME_PATIENT"));
        let id2 = registry.register(candidate("John Smith", "NAME_PATIENT"));
        assert_eq!(id1, id2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn role_conflict_blocks_auto_merge() {
        let registry = EntityRegistry::new();
        let mut patient_ctx = RegisterContext::default();
        patient_ctx.semantic_role = Some("patient".to_string());
        let id1 = registry.register(EntityCandidate { context: patient_ctx, ..candidate("Maria", "NAME_PATIENT") });

        let mut provider_ctx = RegisterContext::default();
        provider_ctx.semantic_role = Some("provider".to_string());
        let id2 = registry.register(EntityCandidate { context: provider_ctx, ..candidate("Maria", "NAME_PROVIDER") });

        // exact match (0.99) minus role conflict (0.50) = 0.49, below both thresholds.
        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn isolated_type_does_not_fuzzy_match() {
        let registry = EntityRegistry::new();
        let id1 = registry.register(candidate("123-45-6789", "SSN"));
        let id2 = registry.register(candidate("123-45-6780", "SSN"));
        assert_ne!(id1, id2);
    }

    #[test]
    fn known_entity_import_is_matched_exactly() {
        let registry = EntityRegistry::new();
        let mut known = HashMap::new();
        known.insert("existing-id".to_string(), ("John Smith".to_string(), "NAME".to_string()));
        registry.import_known_entities(&known);

        let id = registry.register(candidate("John Smith", "NAME_PATIENT"));
        assert_eq!(id, "existing-id");
    }

    #[test]
    fn approve_merge_moves_mentions_and_deletes_candidate() {
        let registry = EntityRegistry::new();
        let target = registry.register(candidate("Maria Rodriguez", "NAME_PATIENT"));
        let blocked = registry.register(candidate("Maria", "NAME_RELATIVE"));
        assert_ne!(target, blocked);

        assert!(registry.approve_merge(&blocked, &target));
        assert!(registry.get_entity(&blocked).is_none());
        assert_eq!(registry.get_entity(&target).unwrap().mention_count(), 2);
    }
}
