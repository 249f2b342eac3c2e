//! Rule-based coreference resolution (spec.md §4.4 Coreference Resolver).
//! Within a sliding window of sentences, links pronouns and last-name-only
//! mentions back to a preceding full-name anchor. Grounded in
//! `original_source/tests/pipeline/test_coref.py`'s documented fallback
//! behavior ("rule-based fallback" used when no ONNX coref model is
//! configured — the ML model itself is out of scope per spec.md Non-goals).

use once_cell::sync::Lazy;
use phi_detect::Span;
use regex::Regex;

pub const DEFAULT_SENTENCE_WINDOW: usize = 3;
pub const DEFAULT_DECAY: f64 = 0.9;
pub const MAX_EXPANSIONS_PER_ANCHOR: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gender {
    Male,
    Female,
    Plural,
    Unknown,
}

fn pronoun_gender(word: &str) -> Option<Gender> {
    match word.to_lowercase().as_str() {
        "he" | "him" | "his" => Some(Gender::Male),
        "she" | "her" | "hers" => Some(Gender::Female),
        "they" | "them" | "their" | "theirs" => Some(Gender::Plural),
        _ => None,
    }
}

static PRONOUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(he|him|his|she|her|hers|they|them|their|theirs)\b").unwrap());

static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());

fn sentence_offsets(text: &str) -> Vec<(usize, usize)> {
    let mut offsets = Vec::new();
    let mut start = 0;
    for m in SENTENCE_BOUNDARY.find_iter(text) {
        offsets.push((start, m.end()));
        start = m.end();
    }
    offsets.push((start, text.len()));
    offsets
}

fn sentence_index_of(offsets: &[(usize, usize)], pos: usize) -> usize {
    offsets.iter().position(|(s, e)| pos >= *s && pos < *e).unwrap_or(offsets.len().saturating_sub(1))
}

/// Best-effort gender guess from a full name's first token (looks up a
/// tiny fixed set of common given names; unknown names resolve to
/// `Unknown`, which can still be linked to `they/them`).
fn guess_gender_from_name(name: &str) -> Gender {
    const MALE_NAMES: &[&str] = &["john", "james", "robert", "michael", "william", "david", "richard", "thomas"];
    const FEMALE_NAMES: &[&str] = &["mary", "jennifer", "linda", "patricia", "elizabeth", "susan", "jessica", "sarah"];
    let first = name.split_whitespace().next().unwrap_or("").to_lowercase();
    if MALE_NAMES.contains(&first.as_str()) {
        Gender::Male
    } else if FEMALE_NAMES.contains(&first.as_str()) {
        Gender::Female
    } else {
        Gender::Unknown
    }
}

/// Links downstream pronouns and last-name-only mentions to the nearest
/// preceding full-name anchor within `sentence_window` sentences.
pub fn resolve_coreferences(text: &str, anchors: Vec<Span>, sentence_window: usize, decay: f64) -> Vec<Span> {
    if anchors.is_empty() {
        return anchors;
    }
    let offsets = sentence_offsets(text);
    let mut new_spans = Vec::new();

    let mut name_anchors: Vec<&Span> = anchors
        .iter()
        .filter(|s| phi_detect::base_entity_type(&s.entity_type) == "NAME" && s.text.contains(' '))
        .collect();
    name_anchors.sort_by_key(|s| s.start);

    for anchor in &name_anchors {
        let anchor_sentence = sentence_index_of(&offsets, anchor.start);
        let gender = guess_gender_from_name(&anchor.text);
        let last_name = anchor.text.split_whitespace().last().unwrap_or("");
        let mut expansions = 0usize;

        for (sent_idx, (sent_start, sent_end)) in offsets.iter().enumerate() {
            if sent_idx <= anchor_sentence || sent_idx > anchor_sentence + sentence_window {
                continue;
            }
            if expansions >= MAX_EXPANSIONS_PER_ANCHOR {
                break;
            }
            let sentence = &text[*sent_start..*sent_end];

            for m in PRONOUN_RE.find_iter(sentence) {
                if expansions >= MAX_EXPANSIONS_PER_ANCHOR {
                    break;
                }
                let Some(pgender) = pronoun_gender(m.as_str()) else { continue };
                let compatible = match (gender, pgender) {
                    (Gender::Unknown, _) => true,
                    (g, p) => g == p,
                };
                if !compatible {
                    continue;
                }
                let distance = sent_idx - anchor_sentence;
                let abs_start = sent_start + m.start();
                let abs_end = sent_start + m.end();
                let mut span = Span::new(
                    abs_start,
                    abs_end,
                    m.as_str(),
                    anchor.entity_type.clone(),
                    anchor.confidence * decay.powi(distance as i32),
                    "coref_pronoun",
                    anchor.tier,
                );
                span.coref_anchor_value = Some(anchor.text.clone());
                new_spans.push(span);
                expansions += 1;
            }

            if last_name.len() >= 3 {
                if let Some(rel) = sentence.find(last_name) {
                    let abs_start = sent_start + rel;
                    let abs_end = abs_start + last_name.len();
                    let valid_start = abs_start == 0 || !text.as_bytes()[abs_start - 1].is_ascii_alphanumeric();
                    let valid_end = abs_end >= text.len() || !text.as_bytes()[abs_end].is_ascii_alphanumeric();
                    if valid_start && valid_end && expansions < MAX_EXPANSIONS_PER_ANCHOR {
                        let distance = sent_idx - anchor_sentence;
                        let mut span = Span::new(
                            abs_start,
                            abs_end,
                            last_name,
                            anchor.entity_type.clone(),
                            anchor.confidence * decay.powi(distance as i32),
                            "coref_partial_name",
                            anchor.tier,
                        );
                        span.coref_anchor_value = Some(anchor.text.clone());
                        new_spans.push(span);
                        expansions += 1;
                    }
                }
            }
        }
    }

    let mut out = anchors;
    out.extend(new_spans);
    out.sort_by_key(|s| s.start);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_detect::Tier;

    #[test]
    fn links_matching_gender_pronoun_within_window() {
        let text = "John Smith arrived today. He was tired. She left separately.";
        let anchor = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let out = resolve_coreferences(text, vec![anchor], DEFAULT_SENTENCE_WINDOW, DEFAULT_DECAY);
        let he_span = out.iter().find(|s| s.text == "He");
        assert!(he_span.is_some());
        assert!(out.iter().find(|s| s.text == "She").is_none());
    }

    #[test]
    fn links_last_name_only_mention() {
        let text = "John Smith was admitted. Smith reported chest pain.";
        let anchor = Span::new(0, 10, "John Smith", "NAME_PATIENT", 0.9, "ml_ner", Tier::Ml);
        let out = resolve_coreferences(text, vec![anchor], DEFAULT_SENTENCE_WINDOW, DEFAULT_DECAY);
        assert!(out.iter().any(|s| s.text == "Smith" && s.start > 10));
    }

    #[test]
    fn decays_confidence_by_sentence_distance() {
        let text = "John Smith arrived. Stable overnight. Vitals normal. He improved.";
        let anchor = Span::new(0, 10, "John Smith", "NAME_PATIENT", 1.0, "ml_ner", Tier::Ml);
        let out = resolve_coreferences(text, vec![anchor], DEFAULT_SENTENCE_WINDOW, DEFAULT_DECAY);
        let he = out.iter().find(|s| s.text == "He").unwrap();
        assert!((he.confidence - DEFAULT_DECAY.powi(3)).abs() < 1e-9);
    }
}
