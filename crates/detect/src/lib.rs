//! phi_detect
//!
//! Detector framework and detector families (spec.md §4.2): checksum,
//! structured, pattern, dictionary, and ML tiers, plus the shared `Span` and
//! `Detector` contract they all implement.

pub mod checksum;
pub mod detector;
pub mod dictionary;
pub mod ml;
pub mod pattern;
pub mod structured;
pub mod types;

pub use detector::{dedup_by_span, Detector};
pub use types::{base_entity_type, infer_semantic_role, Mention, SemanticRole, Span, Tier};

pub use checksum::{
    AbaDetector, CreditCardDetector, DeaDetector, IbanDetector, NpiDetector, SsnDetector, VinDetector,
};
pub use dictionary::DictionaryDetector;
pub use pattern::{
    AgeDetector, DateDetector, EmailDetector, Ipv4Detector, MacDetector, PhoneDetector, UrlDetector, ZipDetector,
};
pub use structured::StructuredLabelDetector;

/// The fixed set of always-available detectors (checksum + pattern tiers).
/// Structured and dictionary detectors are configuration-driven and are
/// assembled by the orchestrator; ML detection requires an external model
/// and is wired in separately via `ml::merge_bio_tags`.
pub fn builtin_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(SsnDetector),
        Box::new(CreditCardDetector),
        Box::new(VinDetector),
        Box::new(IbanDetector),
        Box::new(AbaDetector),
        Box::new(NpiDetector),
        Box::new(DeaDetector),
        Box::new(PhoneDetector),
        Box::new(EmailDetector),
        Box::new(UrlDetector),
        Box::new(Ipv4Detector),
        Box::new(MacDetector),
        Box::new(DateDetector),
        Box::new(AgeDetector),
        Box::new(ZipDetector),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_detectors_each_have_a_name() {
        for d in builtin_detectors() {
            assert!(!d.name().is_empty());
        }
    }

    #[test]
    fn checksum_tier_detectors_outrank_pattern_tier() {
        let detectors = builtin_detectors();
        let ssn = detectors.iter().find(|d| d.name() == "ssn_checksum").unwrap();
        let spans = ssn.detect("SSN 123-45-6789");
        assert_eq!(spans[0].tier, Tier::Checksum);
    }
}
