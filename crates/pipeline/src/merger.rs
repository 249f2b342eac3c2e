//! Overlap-resolution merge stage (spec.md §4.4 Merger). Runs after
//! detection, before repeat expansion. Grounded in the general shape of
//! `original_source/scrubiq/scrubiq/detectors/orchestrator.py`'s dedup
//! passes, generalized to convex-hull merging of same-type overlaps per
//! spec.md's explicit rule (the orchestrator only dedups exact-position
//! duplicates; the merger additionally merges *overlapping, not just
//! identical,* spans).

use phi_detect::{base_entity_type, Span};
use std::collections::HashMap;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Resolves overlaps among spans already produced by the orchestrator.
/// Same-type overlaps merge into their convex hull at `max(confidence)`;
/// different-type overlaps keep the higher-authority span. Name subtypes
/// sharing an exact surface value are unified to the most specific subtype
/// seen for that value, so the tokenizer assigns them all the same token.
pub fn merge_spans(text: &str, spans: Vec<Span>, min_confidence: f64) -> Vec<Span> {
    let mut spans = spans;
    spans.retain(|s| s.confidence >= min_confidence);
    spans.sort_by_key(|s| (s.start, s.end));

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        let Some(last) = merged.last_mut() else {
            merged.push(span);
            continue;
        };
        if !span.overlaps(last) {
            merged.push(span);
            continue;
        }
        if span.entity_type == last.entity_type {
            let new_start = last.start.min(span.start);
            let new_end = last.end.max(span.end);
            let confidence = last.confidence.max(span.confidence);
            let winner = if span.authority_cmp(last) == std::cmp::Ordering::Greater { &span } else { &*last };
            let detector = winner.detector.clone();
            let tier = winner.tier;
            let new_text = text.get(new_start..new_end).unwrap_or(&winner.text).to_string();
            *last = Span::new(new_start, new_end, new_text, last.entity_type.clone(), confidence, detector, tier);
        } else if span.authority_cmp(last) == std::cmp::Ordering::Greater {
            *last = span;
        }
    }

    unify_name_subtypes(merged)
}

/// Name-subtype specificity ranking: `NAME_PATIENT`/`NAME_PROVIDER`/
/// `NAME_RELATIVE` outrank the bare `NAME` fallback. Shared with
/// `repeats::expand_repeated_values`, which re-applies this after expansion
/// introduces fresh spans that may need unifying again.
pub(crate) fn subtype_priority(entity_type: &str) -> u8 {
    if entity_type == "NAME" {
        1
    } else if base_entity_type(entity_type) == "NAME" {
        3
    } else {
        0
    }
}

pub(crate) fn unify_name_subtypes(spans: Vec<Span>) -> Vec<Span> {
    let mut best_type_for_value: HashMap<String, (String, u8)> = HashMap::new();
    for span in &spans {
        if base_entity_type(&span.entity_type) != "NAME" {
            continue;
        }
        let priority = subtype_priority(&span.entity_type);
        best_type_for_value
            .entry(span.text.clone())
            .and_modify(|(cur_type, cur_priority)| {
                if priority > *cur_priority {
                    *cur_type = span.entity_type.clone();
                    *cur_priority = priority;
                }
            })
            .or_insert((span.entity_type.clone(), priority));
    }

    spans
        .into_iter()
        .map(|mut s| {
            if let Some((best_type, _)) = best_type_for_value.get(&s.text) {
                s.entity_type = best_type.clone();
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_detect::Tier;

    #[test]
    fn same_type_overlaps_merge_to_convex_hull() {
        let text = "John Smith Adams";
        let a = Span::new(0, 10, "John Smith", "NAME", 0.7, "ml_ner", Tier::Ml);
        let b = Span::new(5, 16, "Smith Adams", "NAME", 0.8, "ml_ner", Tier::Ml);
        let out = merge_spans(text, vec![a, b], DEFAULT_MIN_CONFIDENCE);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].start, out[0].end), (0, 16));
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn different_type_overlap_keeps_higher_tier() {
        let text = "123-45-6789";
        let checksum = Span::new(0, 11, "123-45-6789", "SSN", 0.97, "ssn_checksum", Tier::Checksum);
        let ml = Span::new(0, 11, "123-45-6789", "PHONE", 0.6, "ml_ner", Tier::Ml);
        let out = merge_spans(text, vec![ml, checksum], DEFAULT_MIN_CONFIDENCE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_type, "SSN");
    }

    #[test]
    fn below_min_confidence_spans_are_dropped() {
        let text = "John";
        let low = Span::new(0, 4, "John", "NAME", 0.2, "ml_ner", Tier::Ml);
        let out = merge_spans(text, vec![low], DEFAULT_MIN_CONFIDENCE);
        assert!(out.is_empty());
    }

    #[test]
    fn unifies_name_subtype_across_positions() {
        let text = "John Smith said hi to John Smith";
        let a = Span::new(0, 10, "John Smith", "NAME", 0.8, "ml_ner", Tier::Ml);
        let b = Span::new(23, 33, "John Smith", "NAME_PATIENT", 0.9, "structured_label", Tier::Structured);
        let out = merge_spans(text, vec![a, b], DEFAULT_MIN_CONFIDENCE);
        assert!(out.iter().all(|s| s.entity_type == "NAME_PATIENT"));
    }
}
