use crate::types::Span;

/// Every detector family implements this contract (spec.md §4.2). Detectors
/// are independent: no shared mutable state between `detect` calls.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self, text: &str) -> Vec<Span>;
    fn is_available(&self) -> bool {
        true
    }
}

/// Deduplicates a detector's own output by `(start, end)`, keeping the
/// highest-confidence span at each position (spec.md §4.2: "Pattern
/// detectors deduplicate by (start, end) within their own output").
pub fn dedup_by_span(mut spans: Vec<Span>) -> Vec<Span> {
    use std::collections::HashMap;
    let mut best: HashMap<(usize, usize), Span> = HashMap::new();
    spans.drain(..).for_each(|s| {
        best.entry((s.start, s.end))
            .and_modify(|existing| {
                if s.confidence > existing.confidence {
                    *existing = s.clone();
                }
            })
            .or_insert(s);
    });
    let mut out: Vec<Span> = best.into_values().collect();
    out.sort_by_key(|s| s.start);
    out
}
