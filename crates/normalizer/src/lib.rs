//! phi_normalizer
//!
//! Transforms input to a stable canonical form before detection, per
//! spec.md §4.1. Grounded in `original_source/scrubiq/pipeline/normalizer.py`:
//! same stage order (NFKC → strip dangerous chars → homoglyph fold → OCR
//! numeric correction), same homoglyph table, same OCR correction windows.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("input looks binary: {0}")]
    BinaryInput(String),
}

/// Zero-width characters that carry no visible meaning but can be used to
/// split up PHI and evade pattern detectors.
const ZERO_WIDTH: &[char] = &[
    '\u{200B}', // ZERO WIDTH SPACE
    '\u{200C}', // ZERO WIDTH NON-JOINER
    '\u{200D}', // ZERO WIDTH JOINER
    '\u{2060}', // WORD JOINER
    '\u{FEFF}', // ZERO WIDTH NO-BREAK SPACE / BOM
    '\u{180E}', // MONGOLIAN VOWEL SEPARATOR
];

/// Bidirectional-control overrides that can visually reorder text.
const BIDI_CONTROLS: &[char] = &[
    '\u{202A}', // LRE
    '\u{202B}', // RLE
    '\u{202C}', // PDF
    '\u{202D}', // LRO
    '\u{202E}', // RLO
    '\u{2066}', // LRI
    '\u{2067}', // RLI
    '\u{2068}', // FSI
    '\u{2069}', // PDI
];

/// C0/C1 control characters and Unicode line/paragraph separators, excluding
/// the whitespace characters (tab, LF, CR) that carry legitimate structure.
const CONTROL_CHARS: &[char] = &[
    '\u{0000}', '\u{0001}', '\u{0002}', '\u{0003}', '\u{0004}', '\u{0005}', '\u{0006}', '\u{0007}',
    '\u{0008}', '\u{000B}', '\u{000C}', '\u{000E}', '\u{000F}', '\u{0010}', '\u{0011}', '\u{0012}',
    '\u{0013}', '\u{0014}', '\u{0015}', '\u{0016}', '\u{0017}', '\u{0018}', '\u{0019}', '\u{001A}',
    '\u{001B}', '\u{001C}', '\u{001D}', '\u{001E}', '\u{001F}', '\u{007F}', '\u{2028}', '\u{2029}',
];

static HOMOGLYPHS: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Cyrillic lookalikes -> Latin.
    for (cyr, lat) in [
        ('а', 'a'), ('е', 'e'), ('о', 'o'), ('р', 'p'), ('с', 'c'), ('х', 'x'), ('у', 'y'),
        ('А', 'A'), ('В', 'B'), ('Е', 'E'), ('К', 'K'), ('М', 'M'), ('Н', 'H'), ('О', 'O'),
        ('Р', 'P'), ('С', 'C'), ('Т', 'T'), ('Х', 'X'), ('і', 'i'), ('І', 'I'), ('ѕ', 's'),
    ] {
        m.insert(cyr, lat);
    }
    // Greek lookalikes -> Latin.
    for (grk, lat) in [
        ('Α', 'A'), ('Β', 'B'), ('Ε', 'E'), ('Ζ', 'Z'), ('Η', 'H'), ('Ι', 'I'), ('Κ', 'K'),
        ('Μ', 'M'), ('Ν', 'N'), ('Ο', 'O'), ('Ρ', 'P'), ('Τ', 'T'), ('Υ', 'Y'), ('Χ', 'X'),
        ('ο', 'o'), ('ν', 'v'),
    ] {
        m.insert(grk, lat);
    }
    // Turkish dotted/dotless I.
    m.insert('İ', 'I');
    m.insert('ı', 'i');
    // Fullwidth Latin forms -> ASCII.
    for c in '\u{FF21}'..='\u{FF3A}' {
        let ascii = (b'A' + (c as u32 - 0xFF21) as u8) as char;
        m.insert(c, ascii);
    }
    for c in '\u{FF41}'..='\u{FF5A}' {
        let ascii = (b'a' + (c as u32 - 0xFF41) as u8) as char;
        m.insert(c, ascii);
    }
    for c in '\u{FF10}'..='\u{FF19}' {
        let ascii = (b'0' + (c as u32 - 0xFF10) as u8) as char;
        m.insert(c, ascii);
    }
    m
});

static OCR_NUMERIC_WINDOW: Lazy<Regex> = Lazy::new(|| {
    // SSN-like, phone-like, date-like, long-digit, ZIP-like windows: a run
    // of digits and OCR-confusable letters at least 5 characters long,
    // optionally separated by '-', '/', '.', or spaces.
    Regex::new(r"[0-9OolISsBGZz][0-9OolISsBGZz\-/. ]{3,}[0-9OolISsBGZz]").unwrap()
});

fn ocr_char_map(c: char) -> Option<char> {
    match c {
        'l' | 'I' => Some('1'),
        'O' | 'o' => Some('0'),
        'S' | 's' => Some('5'),
        'B' => Some('8'),
        'G' => Some('6'),
        'Z' | 'z' => Some('2'),
        _ => None,
    }
}

/// Rejects input that looks binary rather than text: a null byte, or more
/// than 30% non-printable characters.
pub fn is_binary(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return true;
    }
    match std::str::from_utf8(bytes) {
        Err(_) => true,
        Ok(s) => {
            if s.is_empty() {
                return false;
            }
            let non_printable = s
                .chars()
                .filter(|c| c.is_control() && *c != '\t' && *c != '\n' && *c != '\r')
                .count();
            (non_printable as f64) / (s.chars().count() as f64) > 0.30
        }
    }
}

pub fn safe_decode(bytes: &[u8]) -> Result<String, NormalizeError> {
    if is_binary(bytes) {
        return Err(NormalizeError::BinaryInput(
            "input contains a null byte or is mostly non-printable".to_string(),
        ));
    }
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| NormalizeError::BinaryInput("input is not valid UTF-8".to_string()))
}

fn strip_dangerous_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !ZERO_WIDTH.contains(c) && !BIDI_CONTROLS.contains(c) && !CONTROL_CHARS.contains(c))
        .collect()
}

fn fold_homoglyphs(s: &str) -> String {
    s.chars()
        .map(|c| *HOMOGLYPHS.get(&c).unwrap_or(&c))
        .collect()
}

fn fix_ocr_numerics(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_end = 0;
    for m in OCR_NUMERIC_WINDOW.find_iter(s) {
        out.push_str(&s[last_end..m.start()]);
        let fixed: String = m
            .as_str()
            .chars()
            .map(|c| ocr_char_map(c).unwrap_or(c))
            .collect();
        out.push_str(&fixed);
        last_end = m.end();
    }
    out.push_str(&s[last_end..]);
    out
}

/// The full normalization pipeline. Empty input (after an upstream null
/// check) yields an empty string. Idempotent: `normalize(normalize(t)) ==
/// normalize(t)`.
pub fn normalize(input: &str) -> String {
    let nfkc: String = input.nfkc().collect();
    let stripped = strip_dangerous_chars(&nfkc);
    let folded = fold_homoglyphs(&stripped);
    fix_ocr_numerics(&folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_zero_width_and_bidi() {
        let input = "John\u{200B}\u{202E}Smith";
        let out = normalize(input);
        assert_eq!(out, "JohnSmith");
    }

    #[test]
    fn folds_cyrillic_homoglyphs() {
        // Cyrillic "А" (U+0410) and "О" (U+041E) look like Latin A/O.
        let input = "\u{0410}pple";
        assert_eq!(normalize(input), "Apple");
    }

    #[test]
    fn corrects_ocr_digits_in_ssn_window() {
        let input = "SSN: l23-45-67B9";
        let out = normalize(input);
        assert!(out.contains("123-45-6789"));
    }

    #[test]
    fn leaves_ordinary_prose_letters_untouched() {
        let input = "Patient is stable and alert.";
        assert_eq!(normalize(input), input);
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = "Jo\u{200B}hn \u{0410}dams, l23-45-6789";
        let once = normalize(input);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_binary_input() {
        let bytes = b"abc\0def";
        assert!(is_binary(bytes));
        assert!(safe_decode(bytes).is_err());
    }

    #[test]
    fn accepts_ordinary_text_bytes() {
        let bytes = "Hello, world!".as_bytes();
        assert!(!is_binary(bytes));
        assert_eq!(safe_decode(bytes).unwrap(), "Hello, world!");
    }
}
