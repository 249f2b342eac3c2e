//! Dictionary-tier detector: a lower-authority wordlist match, for terms that
//! are reliably PHI-adjacent but carry no pattern or checksum (e.g. named
//! facilities, named conditions configured by a deployment). Grounded in
//! `original_source/scrubiq/scrubiq/detectors/dictionary.py`.

use crate::types::{Span, Tier};

pub struct DictionaryDetector {
    name: String,
    entity_type: String,
    terms: Vec<String>,
}

impl DictionaryDetector {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, terms: Vec<String>) -> Self {
        let mut terms: Vec<String> = terms.into_iter().map(|t| t.to_lowercase()).collect();
        terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
        Self { name: name.into(), entity_type: entity_type.into(), terms }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detect(&self, text: &str) -> Vec<Span> {
        let lower = text.to_lowercase();
        let mut out = Vec::new();
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for term in &self.terms {
            if term.is_empty() {
                continue;
            }
            let mut search_from = 0;
            while let Some(rel) = lower[search_from..].find(term.as_str()) {
                let start = search_from + rel;
                let end = start + term.len();
                search_from = end;
                let at_word_start = start == 0 || !lower.as_bytes()[start - 1].is_ascii_alphanumeric();
                let at_word_end = end == lower.len() || !lower.as_bytes()[end].is_ascii_alphanumeric();
                if !at_word_start || !at_word_end {
                    continue;
                }
                if claimed.iter().any(|(s, e)| start < *e && *s < end) {
                    continue;
                }
                claimed.push((start, end));
                out.push(Span::new(
                    start,
                    end,
                    &text[start..end],
                    self.entity_type.clone(),
                    0.7,
                    self.name.clone(),
                    Tier::Pattern,
                ));
            }
        }
        out.sort_by_key(|s| s.start);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_word_terms_case_insensitively() {
        let d = DictionaryDetector::new(
            "facility_dict",
            "FACILITY",
            vec!["St. Mary's Hospital".to_string(), "General Clinic".to_string()],
        );
        let spans = d.detect("Transferred from st. mary's hospital yesterday.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "FACILITY");
    }

    #[test]
    fn does_not_match_partial_word() {
        let d = DictionaryDetector::new("cond_dict", "CONDITION", vec!["ra".to_string()]);
        assert!(d.detect("transplant").is_empty());
    }

    #[test]
    fn prefers_longer_overlapping_term() {
        let d = DictionaryDetector::new(
            "facility_dict",
            "FACILITY",
            vec!["General".to_string(), "General Clinic".to_string()],
        );
        let spans = d.detect("seen at General Clinic today");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "General Clinic");
    }
}
