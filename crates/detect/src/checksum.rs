//! Checksum validators and detectors: SSN format + area-code blocklist,
//! credit-card Luhn, VIN check digit, IBAN mod-97, ABA routing mod-10, NPI
//! (Luhn with the fixed "80840" prefix), DEA. Grounded in
//! `original_source/openlabels/adapters/scanner/detectors/patterns/validators.py`
//! and `original_source/scrubiq/scrubiq/detectors/structured.py`.

use crate::detector::{dedup_by_span, Detector};
use crate::types::{Span, Tier};
use once_cell::sync::Lazy;
use regex::Regex;

const INVALID_AREA_CODES: &[&str] = &[
    "000", "555", "911", "411", "611", "711", "811", "311", "211", "511",
];

pub fn luhn_check(digits: &str) -> bool {
    let digits: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 2 {
        return false;
    }
    let mut sum = 0u32;
    for (i, d) in digits.iter().rev().enumerate() {
        let mut d = *d;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

pub fn validate_ssn_area(area_code: &str) -> bool {
    !INVALID_AREA_CODES.contains(&area_code)
}

/// Rejects a 9-digit number as likely NOT an SSN based on preceding
/// context, unless confidence is already high.
pub fn validate_ssn_context(text: &str, start: usize, confidence: f64) -> bool {
    if confidence > 0.75 {
        return true;
    }
    const FALSE_POSITIVE_WORDS: &[&str] = &[
        "page", "pg", "room", "rm", "order", "ref", "reference", "invoice", "confirmation",
        "tracking", "case", "ticket", "claim", "check", "acct", "record", "file", "document",
        "doc", "no", "num", "code", "pin", "serial", "model", "part", "item", "sku", "upc",
        "isbn", "version", "ver", "batch", "lot", "catalog", "product", "unit", "id", "make",
        "type", "series",
    ];
    let prefix_start = start.saturating_sub(30).min(start);
    let prefix = text
        .get(prefix_start..start)
        .unwrap_or("")
        .to_lowercase();
    FALSE_POSITIVE_WORDS.iter().any(|w| prefix.contains(w))
}

pub fn validate_vin(vin: &str) -> bool {
    if vin.len() != 17 {
        return false;
    }
    let trans = |c: char| -> Option<u32> {
        match c {
            'A' => Some(1), 'B' => Some(2), 'C' => Some(3), 'D' => Some(4), 'E' => Some(5),
            'F' => Some(6), 'G' => Some(7), 'H' => Some(8), 'J' => Some(1), 'K' => Some(2),
            'L' => Some(3), 'M' => Some(4), 'N' => Some(5), 'P' => Some(7), 'R' => Some(9),
            'S' => Some(2), 'T' => Some(3), 'U' => Some(4), 'V' => Some(5), 'W' => Some(6),
            'X' => Some(7), 'Y' => Some(8), 'Z' => Some(9),
            _ => None,
        }
    };
    const WEIGHTS: [u32; 17] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];
    let upper: Vec<char> = vin.to_uppercase().chars().collect();
    let mut total = 0u32;
    for (i, c) in upper.iter().enumerate() {
        let value = if let Some(d) = c.to_digit(10) {
            d
        } else if let Some(v) = trans(*c) {
            v
        } else {
            return false;
        };
        total += value * WEIGHTS[i];
    }
    let check = total % 11;
    let check_char = if check == 10 { 'X' } else { std::char::from_digit(check, 10).unwrap() };
    upper[8] == check_char
}

/// IBAN mod-97 check per ISO 7064.
pub fn validate_iban(iban: &str) -> bool {
    let iban: String = iban.chars().filter(|c| !c.is_whitespace()).collect();
    if iban.len() < 15 || iban.len() > 34 {
        return false;
    }
    let rearranged = format!("{}{}", &iban[4..], &iban[..4]);
    let mut numeric = String::with_capacity(rearranged.len() * 2);
    for c in rearranged.chars() {
        if c.is_ascii_digit() {
            numeric.push(c);
        } else if c.is_ascii_alphabetic() {
            numeric.push_str(&(c.to_ascii_uppercase() as u32 - 'A' as u32 + 10).to_string());
        } else {
            return false;
        }
    }
    let mut remainder: u64 = 0;
    for c in numeric.chars() {
        let d = c.to_digit(10).unwrap() as u64;
        remainder = (remainder * 10 + d) % 97;
    }
    remainder == 1
}

/// ABA routing number mod-10 weighted checksum.
pub fn validate_aba(routing: &str) -> bool {
    let digits: Vec<u32> = routing.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 9 {
        return false;
    }
    let weights = [3, 7, 1, 3, 7, 1, 3, 7, 1];
    let sum: u32 = digits.iter().zip(weights.iter()).map(|(d, w)| d * w).sum();
    sum % 10 == 0
}

/// NPI: Luhn over the 10 digits with the fixed "80840" prefix prepended.
pub fn validate_npi(npi: &str) -> bool {
    if npi.len() != 10 || !npi.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    luhn_check(&format!("80840{}", npi))
}

/// DEA number: 2 letters + 6 digits + 1 check digit, checksum over
/// alternating digit positions.
pub fn validate_dea(dea: &str) -> bool {
    let chars: Vec<char> = dea.chars().collect();
    if chars.len() != 9 || !chars[0].is_ascii_alphabetic() || !chars[1].is_ascii_alphabetic() {
        return false;
    }
    let digits: Vec<u32> = chars[2..].iter().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 7 {
        return false;
    }
    let odd_sum = digits[0] + digits[2] + digits[4];
    let even_sum = digits[1] + digits[3] + digits[5];
    let check = (odd_sum + 2 * even_sum) % 10;
    check == digits[6]
}

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{3})[- ](\d{2})[- ](\d{4})\b").unwrap());
static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static VIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").unwrap());
static IBAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").unwrap());
static ABA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{9}\b").unwrap());
static NPI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{10}\b").unwrap());
static DEA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{7}\b").unwrap());

pub struct SsnDetector;
impl Detector for SsnDetector {
    fn name(&self) -> &str {
        "ssn_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in SSN_RE.captures_iter(text) {
            let whole = m.get(0).unwrap();
            let area = &m[1];
            if !validate_ssn_area(area) {
                continue;
            }
            if !validate_ssn_context(text, whole.start(), 0.5) {
                continue;
            }
            out.push(Span::new(
                whole.start(),
                whole.end(),
                whole.as_str(),
                "SSN",
                0.97,
                self.name(),
                Tier::Checksum,
            ));
        }
        dedup_by_span(out)
    }
}

pub struct CreditCardDetector;
impl Detector for CreditCardDetector {
    fn name(&self) -> &str {
        "credit_card_luhn"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in CREDIT_CARD_RE.find_iter(text) {
            let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() < 13 || digits.len() > 19 {
                continue;
            }
            if !luhn_check(&digits) {
                continue;
            }
            out.push(Span::new(
                m.start(),
                m.end(),
                m.as_str(),
                "CREDIT_CARD",
                0.97,
                self.name(),
                Tier::Checksum,
            ));
        }
        dedup_by_span(out)
    }
}

pub struct VinDetector;
impl Detector for VinDetector {
    fn name(&self) -> &str {
        "vin_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in VIN_RE.find_iter(text) {
            if validate_vin(m.as_str()) {
                out.push(Span::new(m.start(), m.end(), m.as_str(), "VIN", 0.97, self.name(), Tier::Checksum));
            }
        }
        dedup_by_span(out)
    }
}

pub struct IbanDetector;
impl Detector for IbanDetector {
    fn name(&self) -> &str {
        "iban_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in IBAN_RE.find_iter(text) {
            if validate_iban(m.as_str()) {
                out.push(Span::new(m.start(), m.end(), m.as_str(), "IBAN", 0.97, self.name(), Tier::Checksum));
            }
        }
        dedup_by_span(out)
    }
}

pub struct AbaDetector;
impl Detector for AbaDetector {
    fn name(&self) -> &str {
        "aba_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in ABA_RE.find_iter(text) {
            if validate_aba(m.as_str()) {
                out.push(Span::new(
                    m.start(),
                    m.end(),
                    m.as_str(),
                    "ACCOUNT_NUMBER",
                    0.95,
                    self.name(),
                    Tier::Checksum,
                ));
            }
        }
        dedup_by_span(out)
    }
}

pub struct NpiDetector;
impl Detector for NpiDetector {
    fn name(&self) -> &str {
        "npi_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in NPI_RE.find_iter(text) {
            if validate_npi(m.as_str()) {
                out.push(Span::new(m.start(), m.end(), m.as_str(), "NPI", 0.97, self.name(), Tier::Checksum));
            }
        }
        dedup_by_span(out)
    }
}

pub struct DeaDetector;
impl Detector for DeaDetector {
    fn name(&self) -> &str {
        "dea_checksum"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in DEA_RE.find_iter(text) {
            if validate_dea(m.as_str()) {
                out.push(Span::new(m.start(), m.end(), m.as_str(), "DEA", 0.97, self.name(), Tier::Checksum));
            }
        }
        dedup_by_span(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luhn_accepts_known_valid_card() {
        assert!(luhn_check("4111111111111111"));
    }

    #[test]
    fn luhn_rejects_invalid_card() {
        assert!(!luhn_check("1234567890123456"));
    }

    #[test]
    fn ssn_detector_rejects_blocklisted_area_code() {
        let d = SsnDetector;
        let spans = d.detect("SSN: 999-45-6789");
        assert!(spans.is_empty());
    }

    #[test]
    fn ssn_detector_accepts_valid_shape() {
        let d = SsnDetector;
        let spans = d.detect("Patient SSN 123-45-6789 on file.");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "SSN");
    }

    #[test]
    fn credit_card_detector_only_flags_luhn_valid() {
        let d = CreditCardDetector;
        let spans = d.detect("Card 4111-1111-1111-1111 and Card 1234-5678-9012-3456");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.starts_with("4111"));
    }

    #[test]
    fn vin_checksum_validates_check_digit() {
        assert!(validate_vin("1HGCM82633A004352"));
        assert!(!validate_vin("1HGCM82633A004350"));
    }
}
