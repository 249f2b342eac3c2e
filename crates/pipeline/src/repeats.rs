//! Repeat expansion: propagates a detected span's exact surface value to
//! every other word-boundary occurrence in the text. Grounded directly in
//! `original_source/scrubiq/pipeline/repeats.py`.

use crate::intervals::IntervalSet;
use crate::merger::unify_name_subtypes;
use phi_detect::{Span, Tier};
use std::collections::HashMap;

pub const MAX_EXPANSIONS_PER_VALUE: usize = 50;
pub const DEFAULT_CONFIDENCE_DECAY: f64 = 0.95;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.70;

/// Entity types eligible for repeat expansion. Excludes dates (Safe Harbor
/// shifts each occurrence independently) and clinical-context types.
pub const REPEAT_ELIGIBLE_TYPES: &[&str] = &[
    "NAME", "NAME_PATIENT", "NAME_PROVIDER", "NAME_RELATIVE",
    "PHONE", "FAX", "EMAIL", "PAGER",
    "SSN", "SSN_PARTIAL", "MRN", "ENCOUNTER_ID", "ACCESSION_ID",
    "MEMBER_ID", "MEDICARE_ID", "HEALTH_PLAN_ID", "PHARMACY_ID",
    "NPI", "DEA", "MEDICAL_LICENSE", "DRIVER_LICENSE", "PASSPORT",
    "CREDIT_CARD", "ACCOUNT_NUMBER", "IBAN", "ACCOUNT_ROUTING",
    "IP_ADDRESS", "MAC_ADDRESS", "IMEI", "DEVICE_ID",
    "URL", "USERNAME",
];

/// Finds every other exact, word-bounded occurrence of each eligible
/// anchor span's surface value and emits a new span there at
/// `confidence * decay`, linked back to the anchor via `coref_anchor_value`.
/// Longer anchor values are expanded first so "John Smith" claims its
/// occurrences before the shorter "John" anchor would otherwise collide
/// with them.
pub fn expand_repeated_values(
    text: &str,
    spans: Vec<Span>,
    min_confidence: f64,
    confidence_decay: f64,
    max_expansions_per_value: usize,
) -> Vec<Span> {
    if text.is_empty() || spans.is_empty() {
        return spans;
    }

    let mut anchors: Vec<&Span> = spans
        .iter()
        .filter(|s| REPEAT_ELIGIBLE_TYPES.contains(&s.entity_type.as_str()) && s.confidence >= min_confidence)
        .collect();
    if anchors.is_empty() {
        return spans;
    }
    anchors.sort_by_key(|s| std::cmp::Reverse(s.text.len()));

    let mut covered = IntervalSet::from_spans(spans.iter().map(|s| (s.start, s.end)));
    let mut expansion_count: HashMap<String, usize> = HashMap::new();
    let mut new_spans = Vec::new();

    for anchor in anchors {
        let value = &anchor.text;
        if value.len() < 3 {
            continue;
        }
        let count = expansion_count.entry(value.clone()).or_insert(0);
        if *count >= max_expansions_per_value {
            continue;
        }

        let mut search_from = 0;
        while let Some(rel) = text[search_from..].find(value.as_str()) {
            if *count >= max_expansions_per_value {
                break;
            }
            let pos = search_from + rel;
            let end_pos = pos + value.len();
            search_from = pos + 1;

            if covered.contains_exact(pos, end_pos) {
                continue;
            }
            if covered.overlaps(pos, end_pos) {
                continue;
            }
            let valid_start = pos == 0 || !text.as_bytes()[pos - 1].is_ascii_alphanumeric();
            let valid_end = end_pos >= text.len() || !text.as_bytes()[end_pos].is_ascii_alphanumeric();
            if !valid_start || !valid_end {
                continue;
            }

            let mut new_span =
                Span::new(pos, end_pos, value.clone(), anchor.entity_type.clone(), anchor.confidence * confidence_decay, "repeat_finder", Tier::Ml);
            new_span.coref_anchor_value = Some(anchor.text.clone());
            covered.insert(pos, end_pos);
            *count += 1;
            new_spans.push(new_span);
        }
    }

    let mut result = spans;
    result.extend(new_spans);
    result.sort_by_key(|s| s.start);
    unify_name_subtypes(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_repeated_name_across_text() {
        let text = "John Smith arrived. Later, John Smith left.";
        let anchor = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Structured);
        let out = expand_repeated_values(text, vec![anchor], DEFAULT_MIN_CONFIDENCE, DEFAULT_CONFIDENCE_DECAY, MAX_EXPANSIONS_PER_VALUE);
        assert_eq!(out.len(), 2);
        assert!((out[1].confidence - 0.9 * DEFAULT_CONFIDENCE_DECAY).abs() < 1e-9);
    }

    #[test]
    fn does_not_match_substring_without_word_boundary() {
        let text = "John Johnson";
        let anchor = Span::new(0, 4, "John", "NAME", 0.9, "ml_ner", Tier::Ml);
        let out = expand_repeated_values(text, vec![anchor], DEFAULT_MIN_CONFIDENCE, DEFAULT_CONFIDENCE_DECAY, MAX_EXPANSIONS_PER_VALUE);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn respects_expansion_cap() {
        let value = "Bob Lee";
        let text = format!("{} ", value).repeat(60);
        let anchor = Span::new(0, 7, value, "NAME", 0.9, "ml_ner", Tier::Ml);
        let out = expand_repeated_values(&text, vec![anchor], DEFAULT_MIN_CONFIDENCE, DEFAULT_CONFIDENCE_DECAY, 5);
        assert_eq!(out.len(), 6); // anchor + 5 expansions
    }

    #[test]
    fn non_eligible_type_is_not_expanded() {
        let text = "hypertension noted. hypertension again.";
        let anchor = Span::new(0, 12, "hypertension", "DIAGNOSIS", 0.9, "dict", Tier::Pattern);
        let out = expand_repeated_values(text, vec![anchor], DEFAULT_MIN_CONFIDENCE, DEFAULT_CONFIDENCE_DECAY, MAX_EXPANSIONS_PER_VALUE);
        assert_eq!(out.len(), 1);
    }
}
