//! Per-call entity resolution: groups spans from one `redact` invocation
//! into provisional entities via union-find. Distinct from [`crate::registry`],
//! which is the cross-call identity authority — this module only decides
//! which spans *within a single call* refer to the same entity; the
//! registry decides whether that provisional entity is new or an existing
//! one across calls. Grounded directly in
//! `original_source/scrubiq/pipeline/entity_resolver.py`.

use phi_detect::{base_entity_type, infer_semantic_role, Mention, SemanticRole, Span};
use std::collections::{HashMap, HashSet};

const NAME_PREFIXES: &[&str] = &["mr", "mrs", "ms", "miss", "dr", "prof", "sr", "jr"];

/// A resolved entity: one or more mentions the resolver believes refer to
/// the same real-world person or identifier.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub canonical_value: String,
    pub mentions: Vec<Mention>,
}

impl Entity {
    fn new(id: String, entity_type: String, canonical_value: String) -> Self {
        Self { id, entity_type, canonical_value, mentions: Vec::new() }
    }
}

fn normalize_name(text: &str) -> String {
    let text = text.to_lowercase();
    let mut parts: Vec<&str> = text.split_whitespace().collect();
    if let Some(first) = parts.first() {
        if NAME_PREFIXES.contains(&first.trim_end_matches('.')) {
            parts.remove(0);
        }
    }
    parts.join(" ")
}

fn name_words(text: &str) -> HashSet<String> {
    normalize_name(text)
        .replace('.', "")
        .split_whitespace()
        .filter(|w| w.len() >= 2 && !NAME_PREFIXES.contains(w))
        .map(String::from)
        .collect()
}

fn is_name_type(entity_type: &str) -> bool {
    base_entity_type(entity_type) == "NAME" || entity_type == "PERSON" || entity_type == "PER"
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let (mut px, mut py) = (self.find(x), self.find(y));
        if px == py {
            return;
        }
        if self.rank[px] < self.rank[py] {
            std::mem::swap(&mut px, &mut py);
        }
        self.parent[py] = px;
        if self.rank[px] == self.rank[py] {
            self.rank[px] += 1;
        }
    }
}

/// Groups non-overlapping spans from the merge/coref stages into
/// provisional [`Entity`] values, optionally matching against
/// `known_entities` carried over from a previous call
/// (`entity_id -> (canonical_value, entity_type)`).
pub fn resolve_entities(spans: Vec<Span>, known_entities: &HashMap<String, (String, String)>) -> Vec<Entity> {
    if spans.is_empty() {
        return Vec::new();
    }

    let mentions: Vec<Mention> =
        spans.into_iter().map(|span| Mention { semantic_role: infer_semantic_role(&span.entity_type), span }).collect();
    let n = mentions.len();
    let mut uf = UnionFind::new(n);

    let mut by_normalized: HashMap<String, Vec<usize>> = HashMap::new();
    let mut by_coref_anchor: HashMap<String, Vec<usize>> = HashMap::new();
    let mut name_word_sets: HashMap<usize, HashSet<String>> = HashMap::new();

    for (i, mention) in mentions.iter().enumerate() {
        let norm = normalize_name(&mention.span.text);
        by_normalized.entry(norm).or_default().push(i);

        if let Some(anchor) = &mention.span.coref_anchor_value {
            by_coref_anchor.entry(normalize_name(anchor)).or_default().push(i);
        }

        if is_name_type(&mention.span.entity_type) {
            name_word_sets.insert(i, name_words(&mention.span.text));
        }
    }

    // Sieve 1: exact normalized match, same base type.
    for indices in by_normalized.values() {
        if indices.len() < 2 {
            continue;
        }
        let first = indices[0];
        for &other in &indices[1..] {
            if base_entity_type(&mentions[first].span.entity_type) == base_entity_type(&mentions[other].span.entity_type) {
                uf.union(first, other);
            }
        }
    }

    // Sieve 2: multi-word name subset (>=2 shared words) — conservative,
    // avoids merging different people who happen to share one name word.
    let name_indices: Vec<usize> = name_word_sets.keys().copied().collect();
    for (i, &idx_a) in name_indices.iter().enumerate() {
        let words_a = &name_word_sets[&idx_a];
        if words_a.is_empty() {
            continue;
        }
        for &idx_b in &name_indices[i + 1..] {
            let words_b = &name_word_sets[&idx_b];
            if words_b.is_empty() {
                continue;
            }
            let (smaller, larger) = if words_a.len() <= words_b.len() { (words_a, words_b) } else { (words_b, words_a) };
            if smaller.len() >= 2 && smaller.is_subset(larger) {
                uf.union(idx_a, idx_b);
            }
        }
    }

    // Sieve 3: coreference anchor link.
    for (anchor_norm, pronoun_indices) in &by_coref_anchor {
        if let Some(anchor_indices) = by_normalized.get(anchor_norm) {
            if let Some(&anchor_idx) = anchor_indices.first() {
                for &pronoun_idx in pronoun_indices {
                    uf.union(anchor_idx, pronoun_idx);
                }
            }
        }
    }

    // Sieve 4: known-entity matching (exact, or multi-word partial).
    let mut known_by_value: HashMap<String, &str> = HashMap::new();
    let mut known_by_word: HashMap<String, HashSet<&str>> = HashMap::new();
    for (eid, (value, _etype)) in known_entities {
        known_by_value.insert(normalize_name(value), eid.as_str());
        for word in name_words(value) {
            known_by_word.entry(word).or_default().insert(eid.as_str());
        }
    }

    let mut known_matches: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, mention) in mentions.iter().enumerate() {
        if !is_name_type(&mention.span.entity_type) {
            continue;
        }
        let norm = normalize_name(&mention.span.text);
        if let Some(&eid) = known_by_value.get(&norm) {
            known_matches.entry(eid).or_default().push(i);
            continue;
        }
        let words = name_words(&mention.span.text);
        if words.len() < 2 {
            continue;
        }
        let mut candidate_eids: HashSet<&str> = HashSet::new();
        for word in &words {
            if let Some(eids) = known_by_word.get(word) {
                candidate_eids.extend(eids.iter().copied());
            }
        }
        if let Some(&eid) = candidate_eids.iter().next() {
            known_matches.entry(eid).or_default().push(i);
        }
    }

    // Collect groups from union-find.
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }

    let mut entities = Vec::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for (eid, indices) in &known_matches {
        let mut all_indices: HashSet<usize> = HashSet::new();
        for &i in indices {
            let root = uf.find(i);
            all_indices.extend(groups.get(&root).cloned().unwrap_or_else(|| vec![i]));
        }
        processed.extend(&all_indices);

        let (canon_value, etype) = &known_entities[*eid];
        let mut entity = Entity::new(eid.to_string(), base_entity_type(etype), canon_value.clone());
        let mut sorted: Vec<usize> = all_indices.into_iter().collect();
        sorted.sort_unstable();
        for i in sorted {
            entity.mentions.push(mentions[i].clone());
        }
        entities.push(entity);
    }

    for (_root, indices) in &groups {
        if indices.iter().any(|i| processed.contains(i)) {
            continue;
        }
        entities.push(create_entity_from_indices(&mentions, indices));
    }

    entities
}

fn create_entity_from_indices(mentions: &[Mention], indices: &[usize]) -> Entity {
    let best_idx = *indices.iter().max_by_key(|&&i| mentions[i].span.text.len()).unwrap();
    let canonical = mentions[best_idx].span.text.clone();
    let base_type = base_entity_type(&mentions[best_idx].span.entity_type);
    let id = uuid::Uuid::new_v4().to_string();
    let mut entity = Entity::new(id, base_type, canonical);
    for &i in indices {
        entity.mentions.push(mentions[i].clone());
    }
    entity
}

/// Exposed for [`crate::context`] gender-hint lookups and tests; not part
/// of the resolver's own decision logic.
pub fn semantic_role_name(role: &SemanticRole) -> &'static str {
    match role {
        SemanticRole::Patient => "patient",
        SemanticRole::Provider => "provider",
        SemanticRole::Relative => "relative",
        SemanticRole::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_detect::Tier;
    use std::collections::HashMap;

    #[test]
    fn exact_match_groups_into_one_entity() {
        let a = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let b = Span::new(20, 30, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let entities = resolve_entities(vec![a, b], &HashMap::new());
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].mentions.len(), 2);
    }

    #[test]
    fn multi_word_subset_merges_conservatively() {
        let full = Span::new(0, 16, "Dr. John A Smith", "NAME_PROVIDER", 0.9, "ml_ner", Tier::Ml);
        let partial = Span::new(20, 30, "John Smith", "NAME_PROVIDER", 0.8, "ml_ner", Tier::Ml);
        let entities = resolve_entities(vec![full, partial], &HashMap::new());
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn single_word_overlap_does_not_merge() {
        let a = Span::new(0, 5, "Maria", "NAME_RELATIVE", 0.9, "ml_ner", Tier::Ml);
        let b = Span::new(20, 35, "Maria Rodriguez", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let entities = resolve_entities(vec![a, b], &HashMap::new());
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn coref_anchor_links_pronoun_to_entity() {
        let anchor = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let mut pronoun = Span::new(20, 22, "He", "NAME_PATIENT", 0.8, "coref_pronoun", Tier::Ml);
        pronoun.coref_anchor_value = Some("John Smith".to_string());
        let entities = resolve_entities(vec![anchor, pronoun], &HashMap::new());
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].mentions.len(), 2);
    }

    #[test]
    fn known_entity_exact_match_reuses_id() {
        let mut known = HashMap::new();
        known.insert("known-id-1".to_string(), ("John Smith".to_string(), "NAME".to_string()));
        let span = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let entities = resolve_entities(vec![span], &known);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "known-id-1");
    }
}
