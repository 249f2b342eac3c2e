//! HIPAA Safe Harbor generalization transform (spec.md §4.5). Grounded
//! directly in `original_source/scrubiq/pipeline/safe_harbor.py`: the
//! zero-prefix ZIP set, date-year extraction patterns, and age/zip/date
//! generalization rules are carried over exactly.

use once_cell::sync::Lazy;
use phi_detect::Span;
use regex::Regex;

/// 3-digit ZIP prefixes the Census Bureau designates as containing fewer
/// than 20,000 people; Safe Harbor requires these collapse to "000"
/// instead of keeping their own prefix (45 CFR 164.514(b)(2)(i)(B)).
pub const HIPAA_ZERO_PREFIXES: &[&str] = &[
    "036", "059", "063", "102", "203", "556", "692", "790", "821", "823", "830", "831", "878", "879", "884", "890",
    "893",
];

pub const DATE_TYPES: &[&str] = &["DATE", "DATE_DOB", "DATE_RANGE", "BIRTH_YEAR"];

static BARE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());
static US_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/(\d{2,4})\b").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-\d{2}-\d{2}\b").unwrap());
static LONG_DATE_MDY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[A-Za-z]+\s+\d{1,2},?\s+(\d{4})\b").unwrap());
static LONG_DATE_DMY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d{1,2}\s+[A-Za-z]+,?\s+(\d{4})\b").unwrap());

/// Extracts the 4-digit year from a date-like string, trying the original
/// source's pattern list in order (ISO, US slash form, long-form month
/// names, then a bare 4-digit year as a last resort).
fn extract_year(value: &str) -> Option<i32> {
    if let Some(caps) = ISO_DATE.captures(value) {
        return caps.get(1)?.as_str().parse().ok();
    }
    if let Some(caps) = US_DATE.captures(value) {
        let raw = caps.get(1)?.as_str();
        return normalize_two_digit_year(raw);
    }
    if let Some(caps) = LONG_DATE_MDY.captures(value) {
        return caps.get(1)?.as_str().parse().ok();
    }
    if let Some(caps) = LONG_DATE_DMY.captures(value) {
        return caps.get(1)?.as_str().parse().ok();
    }
    if let Some(m) = BARE_YEAR.find(value) {
        return m.as_str().parse().ok();
    }
    None
}

fn normalize_two_digit_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    if raw.len() == 4 {
        Some(year)
    } else {
        Some(if year < 50 { 2000 + year } else { 1900 + year })
    }
}

/// Safe Harbor requires ages over 89 to be generalized to "90+".
pub fn generalize_age(age: u32) -> String {
    if age > 89 {
        "90+".to_string()
    } else {
        age.to_string()
    }
}

/// A date's only HIPAA-significant component is the year; Safe Harbor
/// keeps it verbatim unless it implies age > 89 (left to the caller, which
/// has the patient's reference date — this module only extracts the year).
pub fn generalize_date(value: &str) -> Option<String> {
    extract_year(value).map(|y| y.to_string())
}

/// Truncates a ZIP to its 3-digit prefix, collapsing to "000" when that
/// prefix is in the low-population set.
pub fn truncate_zip(zip: &str) -> String {
    let digits: String = zip.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 3 {
        return "000".to_string();
    }
    let prefix = &digits[..3];
    if HIPAA_ZERO_PREFIXES.contains(&prefix) {
        "000".to_string()
    } else {
        prefix.to_string()
    }
}

/// Applies the Safe Harbor transform in place, populating `span.safe_harbor`
/// for AGE/ZIP/date-family spans. Other identifier types are left for the
/// tokenizer to fully redact; Safe Harbor only generalizes, it never drops
/// the value entirely.
pub fn apply_safe_harbor(spans: Vec<Span>) -> Vec<Span> {
    spans
        .into_iter()
        .map(|mut span| {
            if span.entity_type == "AGE" {
                if let Ok(age) = span.text.trim().parse::<u32>() {
                    span.safe_harbor = Some(generalize_age(age));
                }
            } else if span.entity_type == "ZIP" {
                span.safe_harbor = Some(truncate_zip(&span.text));
            } else if DATE_TYPES.contains(&span.entity_type.as_str()) {
                span.safe_harbor = generalize_date(&span.text);
            }
            span
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_detect::Tier;

    #[test]
    fn age_over_89_generalizes_to_90_plus() {
        assert_eq!(generalize_age(91), "90+");
        assert_eq!(generalize_age(89), "89");
    }

    #[test]
    fn zip_in_zero_prefix_set_collapses_to_000() {
        assert_eq!(truncate_zip("03601"), "000");
        assert_eq!(truncate_zip("02139"), "021");
    }

    #[test]
    fn zip_too_short_collapses_to_000() {
        assert_eq!(truncate_zip("12"), "000");
    }

    #[test]
    fn extracts_year_from_several_date_formats() {
        assert_eq!(extract_year("03/14/1985"), Some(1985));
        assert_eq!(extract_year("1985-03-14"), Some(1985));
        assert_eq!(extract_year("March 14, 1985"), Some(1985));
        assert_eq!(extract_year("14 March 1985"), Some(1985));
    }

    #[test]
    fn apply_safe_harbor_fills_in_generalized_values() {
        let age = Span::new(0, 2, "91", "AGE", 0.9, "age_pattern", Tier::Pattern);
        let zip = Span::new(0, 5, "03601", "ZIP", 0.9, "zip_pattern", Tier::Pattern);
        let dob = Span::new(0, 10, "03/14/1985", "DATE_DOB", 0.9, "date_pattern", Tier::Pattern);
        let out = apply_safe_harbor(vec![age, zip, dob]);
        assert_eq!(out[0].safe_harbor.as_deref(), Some("90+"));
        assert_eq!(out[1].safe_harbor.as_deref(), Some("000"));
        assert_eq!(out[2].safe_harbor.as_deref(), Some("1985"));
    }
}
