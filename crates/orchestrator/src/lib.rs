//! phi_orchestrator
//!
//! Runs the full detector set concurrently over normalized text, applies
//! backpressure, per-detector timeouts, the known-entity pre-pass, and the
//! post-detection pipeline (clinical-context drop, dedup, tracking-number
//! filter, confidence calibration). Grounded in
//! `original_source/scrubiq/scrubiq/detectors/orchestrator.py`.

use phi_detect::{Detector, Span, Tier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Maximum concurrent `detect` calls across the process (spec.md §5,
/// "Detection Orchestrator: the shared worker pool ... is process-global").
pub const MAX_CONCURRENT_DETECTIONS: usize = 10;

/// Maximum pending `detect` calls before backpressure kicks in.
pub const MAX_QUEUE_DEPTH: usize = 50;

pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Entity types that are clinically meaningful but are not themselves PHI
/// (spec.md §4.3 step 1).
pub const CLINICAL_CONTEXT_TYPES: &[&str] = &["LAB_TEST", "DIAGNOSIS", "MEDICATION", "PROCEDURE", "VITAL_SIGN"];

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("detection queue full: {depth} pending (max {max})")]
    QueueFull { depth: usize, max: usize },
}

struct GlobalState {
    semaphore: Semaphore,
    queue_depth: AtomicUsize,
}

static GLOBAL: once_cell_state::Lazy<GlobalState> = once_cell_state::Lazy::new(|| GlobalState {
    semaphore: Semaphore::new(MAX_CONCURRENT_DETECTIONS),
    queue_depth: AtomicUsize::new(0),
});

// A tiny local Lazy so this crate doesn't need to add once_cell solely for
// one static; kept private to avoid polluting the public API.
mod once_cell_state {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

pub fn current_queue_depth() -> usize {
    GLOBAL.queue_depth.load(Ordering::SeqCst)
}

/// A known entity the caller learned about in a prior turn: `(value, entity_type)`.
pub type KnownEntities = HashMap<String, (String, String)>;

/// Emits synthetic high-confidence spans at every exact + word-boundary
/// occurrence of a known entity's value (spec.md §4.3 "Known-entity
/// pre-pass"), including individual words of multi-word values so that a
/// standalone later mention of "John" is recognized once "John Smith" is known.
pub fn detect_known_entities(text: &str, known: &KnownEntities) -> Vec<Span> {
    let lower = text.to_lowercase();
    let mut spans = Vec::new();
    for (value, entity_type) in known.values() {
        let value_lower = value.to_lowercase();
        let mut terms = vec![value_lower.clone()];
        if value_lower.contains(' ') {
            terms.extend(value_lower.split_whitespace().filter(|p| p.len() >= 2).map(|p| p.to_string()));
        }
        for term in terms {
            if term.is_empty() {
                continue;
            }
            let mut search_from = 0;
            while let Some(rel) = lower[search_from..].find(&term) {
                let start = search_from + rel;
                let end = start + term.len();
                search_from = end;
                let valid_start = start == 0 || !lower.as_bytes()[start - 1].is_ascii_alphanumeric();
                let valid_end = end >= lower.len() || !lower.as_bytes()[end].is_ascii_alphanumeric();
                if !valid_start || !valid_end {
                    continue;
                }
                let original = &text[start..end];
                if !original.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    continue;
                }
                spans.push(Span::new(start, end, original, entity_type.clone(), 0.98, "known_entity", Tier::Structured));
            }
        }
    }
    spans
}

/// Configuration for a single orchestrator instance. Cheap to construct;
/// the process-global semaphore and queue depth are shared across instances.
pub struct DetectorOrchestrator {
    detectors: Vec<Arc<dyn Detector>>,
    parallel: bool,
    total_timeout: Duration,
}

impl DetectorOrchestrator {
    pub fn new(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self { detectors, parallel: true, total_timeout: DEFAULT_TOTAL_TIMEOUT }
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Runs every available detector over `text`, applying backpressure,
    /// the known-entity pre-pass, and the post-detection pipeline.
    pub async fn detect(&self, text: &str, known: &KnownEntities) -> Result<Vec<Span>, OrchestratorError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let depth = GLOBAL.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > MAX_QUEUE_DEPTH {
            GLOBAL.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::QueueFull { depth, max: MAX_QUEUE_DEPTH });
        }

        let result = async {
            let _permit = GLOBAL.semaphore.acquire().await.expect("semaphore never closed");
            self.detect_impl(text, known).await
        }
        .await;

        GLOBAL.queue_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn detect_impl(&self, text: &str, known: &KnownEntities) -> Vec<Span> {
        let mut all_spans = detect_known_entities(text, known);

        let available: Vec<Arc<dyn Detector>> =
            self.detectors.iter().filter(|d| d.is_available()).cloned().collect();
        if available.is_empty() {
            return all_spans;
        }

        let per_detector_timeout = if self.parallel {
            self.total_timeout
        } else {
            self.total_timeout / available.len().max(1) as u32
        };

        if self.parallel {
            all_spans.extend(run_parallel(text, &available, per_detector_timeout).await);
        } else {
            all_spans.extend(run_sequential(text, &available, per_detector_timeout).await);
        }

        post_process(text, all_spans)
    }
}

/// Spawns each detector onto the blocking thread pool so CPU-bound regex
/// work genuinely overlaps, mirroring the teacher's `ThreadPoolExecutor`
/// (spec.md §4.3: "in parallel mode each may run up to `total_timeout`").
async fn run_parallel(text: &str, detectors: &[Arc<dyn Detector>], timeout: Duration) -> Vec<Span> {
    let mut handles = Vec::with_capacity(detectors.len());
    for detector in detectors {
        let detector = Arc::clone(detector);
        let text = text.to_string();
        handles.push(tokio::task::spawn_blocking(move || detector.detect(&text)));
    }

    let mut out = Vec::new();
    for (detector, handle) in detectors.iter().zip(handles) {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(spans)) => out.extend(spans),
            Ok(Err(_)) => tracing::error!(detector = %detector.name(), "detector task panicked"),
            Err(_) => tracing::warn!(detector = %detector.name(), "detector timed out"),
        }
    }
    out
}

async fn run_sequential(text: &str, detectors: &[Arc<dyn Detector>], timeout: Duration) -> Vec<Span> {
    let mut out = Vec::new();
    for detector in detectors {
        let d = Arc::clone(detector);
        let t = text.to_string();
        let handle = tokio::task::spawn_blocking(move || d.detect(&t));
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(spans)) => out.extend(spans),
            Ok(Err(_)) => tracing::error!(detector = %detector.name(), "detector task panicked"),
            Err(_) => tracing::warn!(detector = %detector.name(), "detector timed out"),
        }
    }
    out
}

/// Step 1 of spec.md §4.3 post-detection pipeline: drop clinical-context
/// types, then dedup, then filter known tracking-number false positives,
/// then calibrate confidence.
fn post_process(text: &str, spans: Vec<Span>) -> Vec<Span> {
    let spans: Vec<Span> = spans.into_iter().filter(|s| !CLINICAL_CONTEXT_TYPES.contains(&s.entity_type.to_uppercase().as_str())).collect();
    let spans = dedup_spans(spans);
    let spans = filter_tracking_numbers(spans, text);
    calibrate_confidence(spans)
}

/// Dedups first by `(start, end, entity_type)` keeping highest tier then
/// confidence, then by `(start, end)` across types with the same rule.
fn dedup_spans(spans: Vec<Span>) -> Vec<Span> {
    let mut by_type: HashMap<(usize, usize, String), Span> = HashMap::new();
    for span in spans {
        let key = (span.start, span.end, span.entity_type.clone());
        by_type
            .entry(key)
            .and_modify(|existing| {
                if span.authority_cmp(existing) == std::cmp::Ordering::Greater {
                    *existing = span.clone();
                }
            })
            .or_insert(span);
    }

    let mut by_position: HashMap<(usize, usize), Span> = HashMap::new();
    for span in by_type.into_values() {
        let key = (span.start, span.end);
        by_position
            .entry(key)
            .and_modify(|existing| {
                if span.authority_cmp(existing) == std::cmp::Ordering::Greater {
                    *existing = span.clone();
                }
            })
            .or_insert(span);
    }

    let mut out: Vec<Span> = by_position.into_values().collect();
    out.sort_by_key(|s| s.start);
    out
}

/// Drops low-tier numeric spans that coincide with a shipping-carrier
/// tracking-number shape (UPS 1Z-prefixed, FedEx 12/15/20-digit), which are
/// commonly mistaken for MRN/account numbers by pattern detectors.
fn filter_tracking_numbers(spans: Vec<Span>, text: &str) -> Vec<Span> {
    spans
        .into_iter()
        .filter(|s| {
            if s.tier == Tier::Checksum {
                return true;
            }
            if !matches!(s.entity_type.as_str(), "MRN" | "ACCOUNT_NUMBER" | "INSURANCE_ID") {
                return true;
            }
            let context_start = s.start.saturating_sub(6);
            let context = text.get(context_start..s.start).unwrap_or("");
            let looks_like_tracking = s.text.starts_with("1Z") || context.to_lowercase().contains("tracking");
            !looks_like_tracking
        })
        .collect()
}

/// Per-tier confidence calibration (spec.md §4.3 step 4): checksum and
/// structured tiers get a hard floor, ML gets light dampening, pattern
/// passes through unchanged.
fn calibrate_confidence(spans: Vec<Span>) -> Vec<Span> {
    spans
        .into_iter()
        .map(|mut s| {
            s.confidence = match s.tier {
                Tier::Checksum => s.confidence.max(Tier::Checksum.confidence_floor()),
                Tier::Structured => s.confidence.max(Tier::Structured.confidence_floor()),
                Tier::Pattern => s.confidence,
                Tier::Ml => s.confidence * 0.95,
            }
            .clamp(0.0, 1.0);
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_detect::SsnDetector;

    #[test]
    fn known_entity_prepass_matches_whole_and_partial_name() {
        let mut known = KnownEntities::new();
        known.insert("NAME_PATIENT_1".to_string(), ("John Smith".to_string(), "NAME_PATIENT".to_string()));
        let spans = detect_known_entities("John Smith saw Smith again later.", &known);
        assert!(spans.iter().any(|s| s.text == "John Smith"));
        assert!(spans.iter().any(|s| s.text == "Smith" && s.start > 10));
    }

    #[tokio::test]
    async fn detect_runs_builtin_detectors_and_calibrates_confidence() {
        let orchestrator = DetectorOrchestrator::new(vec![Arc::new(SsnDetector)]);
        let spans = orchestrator.detect("SSN 123-45-6789", &KnownEntities::new()).await.unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].confidence >= Tier::Checksum.confidence_floor());
    }

    #[tokio::test]
    async fn detect_on_empty_text_returns_no_spans() {
        let orchestrator = DetectorOrchestrator::new(vec![Arc::new(SsnDetector)]);
        let spans = orchestrator.detect("", &KnownEntities::new()).await.unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn dedup_keeps_higher_tier_at_same_position() {
        let checksum = Span::new(0, 11, "123-45-6789", "SSN", 0.97, "ssn_checksum", Tier::Checksum);
        let pattern = Span::new(0, 11, "123-45-6789", "SSN", 0.6, "generic_digits", Tier::Pattern);
        let out = dedup_spans(vec![pattern, checksum]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tier, Tier::Checksum);
    }

    #[test]
    fn clinical_context_types_are_dropped() {
        let spans = vec![Span::new(0, 3, "Hgb", "LAB_TEST", 0.8, "dict", Tier::Pattern)];
        let out = post_process("Hgb 12", spans);
        assert!(out.is_empty());
    }
}
