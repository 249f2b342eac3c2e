//! Structured-tier detector: a closed `LABEL: value` taxonomy, grounded in
//! `original_source/scrubiq/scrubiq/detectors/structured.py`. Clinical forms
//! and intake documents routinely carry explicit labels ("MRN:", "DOB:") that
//! are a stronger detection signal than pattern matching alone.

use crate::types::{Span, Tier};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Closed label taxonomy: recognized label text (lowercased, punctuation
/// stripped) -> entity type. Only labels in this table extract; anything
/// else is left to pattern/ML tiers.
static LABEL_TAXONOMY: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("mrn", "MRN"),
        ("medical record number", "MRN"),
        ("dob", "DATE"),
        ("date of birth", "DATE"),
        ("ssn", "SSN"),
        ("social security number", "SSN"),
        ("patient name", "NAME_PATIENT"),
        ("name", "NAME_PATIENT"),
        ("provider", "NAME_PROVIDER"),
        ("physician", "NAME_PROVIDER"),
        ("attending", "NAME_PROVIDER"),
        ("address", "ADDRESS"),
        ("phone", "PHONE"),
        ("telephone", "PHONE"),
        ("email", "EMAIL"),
        ("fax", "FAX"),
        ("npi", "NPI"),
        ("dea", "DEA"),
        ("account number", "ACCOUNT_NUMBER"),
        ("policy number", "INSURANCE_ID"),
        ("insurance id", "INSURANCE_ID"),
        ("member id", "INSURANCE_ID"),
        ("zip", "ZIP"),
        ("zip code", "ZIP"),
        ("age", "AGE"),
        ("admission date", "DATE"),
        ("discharge date", "DATE"),
    ])
});

static LABEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z][A-Za-z .]{1,40}?)\s*:\s*(.+)$").unwrap()
});

/// Heuristic rejection of values that look like free-text prose rather than
/// a structured field: long, multi-sentence, or containing a verb-like
/// connector.
fn looks_like_prose(value: &str) -> bool {
    let word_count = value.split_whitespace().count();
    if word_count > 8 {
        return true;
    }
    if value.contains(". ") || value.ends_with('.') && word_count > 4 {
        return true;
    }
    false
}

pub struct StructuredLabelDetector;

impl StructuredLabelDetector {
    pub fn name(&self) -> &str {
        "structured_label"
    }

    pub fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for caps in LABEL_LINE.captures_iter(text) {
            let label_match = caps.get(1).unwrap();
            let value_match = caps.get(2).unwrap();
            let label_key = label_match.as_str().trim().to_lowercase();
            let Some(entity_type) = LABEL_TAXONOMY.get(label_key.as_str()) else {
                continue;
            };
            let raw_value = value_match.as_str().trim_end();
            if raw_value.trim().is_empty() || looks_like_prose(raw_value) {
                continue;
            }
            let trimmed_leading = raw_value.len() - raw_value.trim_start().len();
            let value_start = value_match.start() + trimmed_leading;
            let value = raw_value.trim();
            let value_end = value_start + value.len();
            out.push(Span::new(
                value_start,
                value_end,
                value,
                *entity_type,
                0.92,
                self.name(),
                Tier::Structured,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_labeled_mrn() {
        let d = StructuredLabelDetector;
        let spans = d.detect("MRN: 00482913\nNotes: stable overnight.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "MRN");
        assert_eq!(spans[0].text, "00482913");
    }

    #[test]
    fn skips_unrecognized_labels() {
        let d = StructuredLabelDetector;
        let spans = d.detect("Diagnosis: hypertension");
        assert!(spans.is_empty());
    }

    #[test]
    fn skips_prose_like_values() {
        let d = StructuredLabelDetector;
        let spans = d.detect("Name: the patient reports feeling much better today overall");
        assert!(spans.is_empty());
    }
}
