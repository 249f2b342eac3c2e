use serde::{Deserialize, Serialize};

/// Authority ranking of a detector's output, per spec.md §3/§4.2/glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Ml,
    Pattern,
    Structured,
    Checksum,
}

impl Tier {
    /// Confidence floor applied by the orchestrator's per-tier calibration
    /// (spec.md §4.3 step 4).
    pub fn confidence_floor(&self) -> f64 {
        match self {
            Tier::Checksum => 0.95,
            Tier::Structured => 0.90,
            Tier::Pattern => 0.0,
            Tier::Ml => 0.0,
        }
    }
}

/// A contiguous detection over normalized text. `[start, end)` are byte
/// offsets into the normalized text, half-open, per spec.md §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub entity_type: String,
    pub confidence: f64,
    pub detector: String,
    pub tier: Tier,
    pub safe_harbor: Option<String>,
    pub token: Option<String>,
    pub coref_anchor_value: Option<String>,
    pub needs_review: bool,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        text: impl Into<String>,
        entity_type: impl Into<String>,
        confidence: f64,
        detector: impl Into<String>,
        tier: Tier,
    ) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            entity_type: entity_type.into(),
            confidence: confidence.clamp(0.0, 1.0),
            detector: detector.into(),
            tier,
            safe_harbor: None,
            token: None,
            coref_anchor_value: None,
            needs_review: false,
        }
    }

    /// Span well-formedness invariant, spec.md §8 Testable Property 1:
    /// `0 <= start < end <= |text|` and `text[start:end] == span.text`.
    pub fn is_well_formed(&self, normalized_text: &str) -> bool {
        if self.start >= self.end || self.end > normalized_text.len() {
            return false;
        }
        if !normalized_text.is_char_boundary(self.start) || !normalized_text.is_char_boundary(self.end) {
            return false;
        }
        &normalized_text[self.start..self.end] == self.text.as_str()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Total order used to break ties during merge/dedup: higher tier first,
    /// then higher confidence, then longer span (spec.md §4.3 step 2, §4.4).
    pub fn authority_cmp(&self, other: &Span) -> std::cmp::Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.confidence.partial_cmp(&other.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| (self.end - self.start).cmp(&(other.end - other.start)))
    }
}

/// A Span annotated with semantic role, derived from the type suffix
/// (spec.md §3 Mention).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticRole {
    Patient,
    Provider,
    Relative,
    Unknown,
}

pub fn infer_semantic_role(entity_type: &str) -> SemanticRole {
    if entity_type.ends_with("_PATIENT") {
        SemanticRole::Patient
    } else if entity_type.ends_with("_PROVIDER") {
        SemanticRole::Provider
    } else if entity_type.ends_with("_RELATIVE") {
        SemanticRole::Relative
    } else {
        SemanticRole::Unknown
    }
}

/// Base entity type with any role suffix stripped (spec.md §3 Entity).
pub fn base_entity_type(entity_type: &str) -> String {
    for suffix in ["_PATIENT", "_PROVIDER", "_RELATIVE"] {
        if entity_type.ends_with(suffix) {
            return "NAME".to_string();
        }
    }
    entity_type.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub span: Span,
    pub semantic_role: SemanticRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formedness_checks_text_match() {
        let text = "SSN 123-45-6789";
        let span = Span::new(4, 15, "123-45-6789", "SSN", 0.99, "ssn_checksum", Tier::Checksum);
        assert!(span.is_well_formed(text));

        let bad = Span::new(4, 15, "wrong", "SSN", 0.99, "ssn_checksum", Tier::Checksum);
        assert!(!bad.is_well_formed(text));
    }

    #[test]
    fn tier_ordering_favors_checksum_over_ml() {
        assert!(Tier::Checksum > Tier::Structured);
        assert!(Tier::Structured > Tier::Pattern);
        assert!(Tier::Pattern > Tier::Ml);
    }
}
