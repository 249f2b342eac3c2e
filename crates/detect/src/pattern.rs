//! Pattern-tier detectors: phone, email, URL, IPv4, MAC, date, age, ZIP.
//! Grounded in `original_source/openlabels/adapters/scanner/detectors/patterns/validators.py`
//! and `original_source/scrubiq/scrubiq/detectors/pattern.py`.

use crate::detector::{dedup_by_span, Detector};
use crate::types::{Span, Tier};
use once_cell::sync::Lazy;
use regex::Regex;

/// Rejects a 10-digit phone candidate that is all zeros, sequential, or all
/// the same repeated digit, and a handful of reserved NANP prefixes.
pub fn validate_phone(digits: &str) -> bool {
    let digits: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 10 {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }
    let ascending = digits.windows(2).all(|w| w[1] == w[0] + 1);
    let descending = digits.windows(2).all(|w| w[0] == w[1] + 1);
    if ascending || descending {
        return false;
    }
    const BLOCKED_PREFIXES: &[&str] = &["000", "555", "911"];
    let area: String = digits[0..3].iter().map(|d| std::char::from_digit(*d, 10).unwrap()).collect();
    !BLOCKED_PREFIXES.contains(&area.as_str())
}

pub fn validate_ip(octets: &[u32]) -> bool {
    octets.len() == 4 && octets.iter().all(|o| *o <= 255)
}

/// Real-calendar validation of a year/month/day triple, 1900-2100 inclusive,
/// with leap-year awareness.
pub fn validate_date(year: i32, month: u32, day: u32) -> bool {
    if !(1900..=2100).contains(&year) || !(1..=12).contains(&month) || day == 0 {
        return false;
    }
    let is_leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => if is_leap { 29 } else { 28 },
        _ => return false,
    };
    day <= days_in_month
}

pub fn validate_age(age: u32) -> bool {
    age <= 125
}

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\+?1[-. ]?)?\(?(\d{3})\)?[-. ]?(\d{3})[-. ]?(\d{4})\b").unwrap()
});
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bhttps?://[^\s<>\x22]+").unwrap()
});
static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\b").unwrap()
});
static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}\b").unwrap()
});
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b|\b(\d{4})-(\d{2})-(\d{2})\b").unwrap()
});
static AGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3})[- ]year[- ]old\b|\bage[: ]+(\d{1,3})\b").unwrap()
});
static ZIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").unwrap());

pub struct PhoneDetector;
impl Detector for PhoneDetector {
    fn name(&self) -> &str {
        "phone_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in PHONE_RE.captures_iter(text) {
            let whole = m.get(0).unwrap();
            let digits: String = whole.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            let ten = if digits.len() == 11 && digits.starts_with('1') {
                digits[1..].to_string()
            } else {
                digits.clone()
            };
            if !validate_phone(&ten) {
                continue;
            }
            out.push(Span::new(whole.start(), whole.end(), whole.as_str(), "PHONE", 0.85, self.name(), Tier::Pattern));
        }
        dedup_by_span(out)
    }
}

pub struct EmailDetector;
impl Detector for EmailDetector {
    fn name(&self) -> &str {
        "email_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let out: Vec<Span> = EMAIL_RE
            .find_iter(text)
            .map(|m| Span::new(m.start(), m.end(), m.as_str(), "EMAIL", 0.95, self.name(), Tier::Pattern))
            .collect();
        dedup_by_span(out)
    }
}

pub struct UrlDetector;
impl Detector for UrlDetector {
    fn name(&self) -> &str {
        "url_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let out: Vec<Span> = URL_RE
            .find_iter(text)
            .map(|m| Span::new(m.start(), m.end(), m.as_str(), "URL", 0.9, self.name(), Tier::Pattern))
            .collect();
        dedup_by_span(out)
    }
}

pub struct Ipv4Detector;
impl Detector for Ipv4Detector {
    fn name(&self) -> &str {
        "ipv4_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in IPV4_RE.captures_iter(text) {
            let whole = m.get(0).unwrap();
            let octets: Vec<u32> = (1..=4).map(|i| m[i].parse().unwrap_or(256)).collect();
            if !validate_ip(&octets) {
                continue;
            }
            out.push(Span::new(whole.start(), whole.end(), whole.as_str(), "IP_ADDRESS", 0.9, self.name(), Tier::Pattern));
        }
        dedup_by_span(out)
    }
}

pub struct MacDetector;
impl Detector for MacDetector {
    fn name(&self) -> &str {
        "mac_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let out: Vec<Span> = MAC_RE
            .find_iter(text)
            .map(|m| Span::new(m.start(), m.end(), m.as_str(), "DEVICE_ID", 0.9, self.name(), Tier::Pattern))
            .collect();
        dedup_by_span(out)
    }
}

pub struct DateDetector;
impl Detector for DateDetector {
    fn name(&self) -> &str {
        "date_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in DATE_RE.captures_iter(text) {
            let whole = m.get(0).unwrap();
            let valid = if let (Some(mo), Some(d), Some(y)) = (m.get(1), m.get(2), m.get(3)) {
                let (mo, d, y): (u32, u32, i32) =
                    (mo.as_str().parse().unwrap_or(0), d.as_str().parse().unwrap_or(0), y.as_str().parse().unwrap_or(0));
                validate_date(y, mo, d)
            } else if let (Some(y), Some(mo), Some(d)) = (m.get(4), m.get(5), m.get(6)) {
                let (y, mo, d): (i32, u32, u32) =
                    (y.as_str().parse().unwrap_or(0), mo.as_str().parse().unwrap_or(0), d.as_str().parse().unwrap_or(0));
                validate_date(y, mo, d)
            } else {
                false
            };
            if !valid {
                continue;
            }
            out.push(Span::new(whole.start(), whole.end(), whole.as_str(), "DATE", 0.9, self.name(), Tier::Pattern));
        }
        dedup_by_span(out)
    }
}

pub struct AgeDetector;
impl Detector for AgeDetector {
    fn name(&self) -> &str {
        "age_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        for m in AGE_RE.captures_iter(text) {
            let whole = m.get(0).unwrap();
            let age_str = m.get(1).or_else(|| m.get(2)).map(|g| g.as_str()).unwrap_or("");
            let age: u32 = age_str.parse().unwrap_or(999);
            if !validate_age(age) {
                continue;
            }
            out.push(Span::new(whole.start(), whole.end(), whole.as_str(), "AGE", 0.85, self.name(), Tier::Pattern));
        }
        dedup_by_span(out)
    }
}

pub struct ZipDetector;
impl Detector for ZipDetector {
    fn name(&self) -> &str {
        "zip_pattern"
    }
    fn detect(&self, text: &str) -> Vec<Span> {
        let out: Vec<Span> = ZIP_RE
            .find_iter(text)
            .map(|m| Span::new(m.start(), m.end(), m.as_str(), "ZIP", 0.6, self.name(), Tier::Pattern))
            .collect();
        dedup_by_span(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_detector_rejects_sequential_digits() {
        let d = PhoneDetector;
        assert!(d.detect("Call 123-456-7890 now").is_empty());
    }

    #[test]
    fn phone_detector_accepts_realistic_number() {
        let d = PhoneDetector;
        let spans = d.detect("Call (415) 555-0147 now");
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn email_detector_finds_address() {
        let d = EmailDetector;
        let spans = d.detect("contact jane.doe@example.com please");
        assert_eq!(spans[0].text, "jane.doe@example.com");
    }

    #[test]
    fn ipv4_detector_rejects_out_of_range_octet() {
        let d = Ipv4Detector;
        assert!(d.detect("host 999.1.1.1").is_empty());
    }

    #[test]
    fn date_detector_rejects_invalid_calendar_date() {
        let d = DateDetector;
        assert!(d.detect("on 02/30/2020").is_empty());
        assert_eq!(d.detect("on 02/29/2020").len(), 1);
    }

    #[test]
    fn age_detector_rejects_implausible_age() {
        let d = AgeDetector;
        assert!(d.detect("age: 200").is_empty());
        assert_eq!(d.detect("a 45-year-old patient").len(), 1);
    }
}
