//! ML-tier detector support: BIO tag merging, chunking, and cross-chunk
//! deduplication. Grounded in `original_source/scrubiq/scrubiq/detectors/ml.py`.
//! The model itself is out of scope (spec.md Non-goals); this module is the
//! harness a real named-entity model's BIO output would be fed through.

use crate::detector::dedup_by_span;
use crate::types::{Span, Tier};

pub const CHUNK_SIZE: usize = 1500;
pub const CHUNK_OVERLAP: usize = 300;

/// One token-level BIO prediction from an external model, indexed by byte
/// offsets into the chunk it was produced from.
#[derive(Debug, Clone)]
pub struct BioTag {
    pub start: usize,
    pub end: usize,
    pub tag: String, // "O", "B-NAME", "I-NAME", ...
    pub confidence: f64,
}

fn tag_label(tag: &str) -> Option<(&str, &str)> {
    if tag == "O" {
        return None;
    }
    let (prefix, label) = tag.split_once('-')?;
    Some((prefix, label))
}

/// Merges consecutive B-/I- tags of the same label into single spans, per
/// chunk. Confidence of a merged span is the minimum across its tokens (the
/// weakest-link rule matches the teacher's conservative calibration stance).
pub fn merge_bio_tags(tags: &[BioTag], chunk_text: &str, chunk_offset: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize, String, f64)> = None;

    for tag in tags {
        match tag_label(&tag.tag) {
            Some(("B", label)) => {
                if let Some((start, end, label, conf)) = current.take() {
                    push_merged(&mut spans, start, end, label, conf, chunk_text, chunk_offset);
                }
                current = Some((tag.start, tag.end, label.to_string(), tag.confidence));
            }
            Some(("I", label)) => {
                if let Some((start, end, cur_label, conf)) = current.as_mut() {
                    if *cur_label == label && tag.start <= *end {
                        *end = tag.end;
                        *conf = conf.min(tag.confidence);
                        continue;
                    }
                }
                if let Some((start, end, label, conf)) = current.take() {
                    push_merged(&mut spans, start, end, label, conf, chunk_text, chunk_offset);
                }
                current = Some((tag.start, tag.end, label.to_string(), tag.confidence));
            }
            _ => {
                if let Some((start, end, label, conf)) = current.take() {
                    push_merged(&mut spans, start, end, label, conf, chunk_text, chunk_offset);
                }
            }
        }
    }
    if let Some((start, end, label, conf)) = current.take() {
        push_merged(&mut spans, start, end, label, conf, chunk_text, chunk_offset);
    }
    spans
}

fn push_merged(
    spans: &mut Vec<Span>,
    start: usize,
    end: usize,
    label: String,
    confidence: f64,
    chunk_text: &str,
    chunk_offset: usize,
) {
    let (start, end) = expand_to_word_boundary(chunk_text, start, end);
    let (start, end) = trim_trailing_non_name_word(chunk_text, start, end, &label);
    if start >= end {
        return;
    }
    let Some(text) = chunk_text.get(start..end) else {
        return;
    };
    spans.push(Span::new(
        chunk_offset + start,
        chunk_offset + end,
        text,
        label,
        confidence,
        "ml_ner",
        Tier::Ml,
    ));
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Widens a span outward to the nearest word boundary so a model's
/// sub-token prediction never clips a real word in half.
fn expand_to_word_boundary(text: &str, mut start: usize, mut end: usize) -> (usize, usize) {
    while start > 0 {
        let prev = text[..start].chars().next_back();
        match prev {
            Some(c) if is_word_char(c) => {
                start -= c.len_utf8();
            }
            _ => break,
        }
    }
    while end < text.len() {
        let next = text[end..].chars().next();
        match next {
            Some(c) if is_word_char(c) => {
                end += c.len_utf8();
            }
            _ => break,
        }
    }
    (start, end)
}

const NON_NAME_TRAILERS: &[&str] = &["the", "a", "an", "mr", "mrs", "ms", "dr", "and", "or", "of"];

/// Trims a trailing filler word a model sometimes folds into a NAME span
/// ("John Smith and" -> "John Smith").
fn trim_trailing_non_name_word(text: &str, start: usize, mut end: usize, label: &str) -> (usize, usize) {
    if label != "NAME" && !label.starts_with("NAME_") {
        return (start, end);
    }
    let slice = &text[start..end];
    if let Some(last_word_start) = slice.rfind(|c: char| !is_word_char(c)) {
        let last_word = &slice[last_word_start + 1..];
        if NON_NAME_TRAILERS.contains(&last_word.to_lowercase().as_str()) {
            end = start + last_word_start + 1;
            while end > start && !text[start..end].ends_with(|c: char| is_word_char(c)) {
                end -= 1;
            }
        }
    }
    (start, end)
}

/// Splits long text into overlapping chunks a token model can process,
/// preferring to break at a sentence boundary near the target size.
pub fn chunk_text(text: &str) -> Vec<(usize, &str)> {
    if text.len() <= CHUNK_SIZE {
        return vec![(0, text)];
    }
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let mut end = (pos + CHUNK_SIZE).min(text.len());
        if end < text.len() {
            if let Some(boundary) = find_sentence_boundary(text, pos, end) {
                end = boundary;
            }
        }
        if !text.is_char_boundary(end) {
            while end < text.len() && !text.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push((pos, &text[pos..end]));
        if end >= text.len() {
            break;
        }
        let next_pos = end.saturating_sub(CHUNK_OVERLAP);
        pos = if next_pos > pos { next_pos } else { end };
    }
    chunks
}

fn find_sentence_boundary(text: &str, start: usize, target_end: usize) -> Option<usize> {
    let window_start = start + (CHUNK_SIZE * 2 / 3).min(target_end - start);
    let search = text.get(window_start..target_end)?;
    search
        .rfind(". ")
        .map(|rel| window_start + rel + 2)
        .filter(|boundary| text.is_char_boundary(*boundary))
}

/// Resolves overlapping spans produced across adjacent chunks, keeping the
/// higher-authority span at each contested position.
pub fn dedup_cross_chunk(spans: Vec<Span>) -> Vec<Span> {
    let mut spans = spans;
    spans.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| b.authority_cmp(a)));
    let mut out: Vec<Span> = Vec::new();
    for span in spans {
        if let Some(last) = out.last() {
            if span.overlaps(last) {
                if span.authority_cmp(last) == std::cmp::Ordering::Greater {
                    out.pop();
                    out.push(span);
                }
                continue;
            }
        }
        out.push(span);
    }
    dedup_by_span(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_consecutive_bio_tags_into_one_span() {
        let text = "seen by John Quincy Adams today";
        let tags = vec![
            BioTag { start: 8, end: 12, tag: "B-NAME".into(), confidence: 0.9 },
            BioTag { start: 13, end: 19, tag: "I-NAME".into(), confidence: 0.85 },
            BioTag { start: 20, end: 25, tag: "I-NAME".into(), confidence: 0.88 },
        ];
        let spans = merge_bio_tags(&tags, text, 0);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "John Quincy Adams");
        assert_eq!(spans[0].confidence, 0.85);
    }

    #[test]
    fn trims_trailing_filler_word_from_name_span() {
        let text = "met with John Smith and discussed";
        let tags = vec![
            BioTag { start: 9, end: 13, tag: "B-NAME".into(), confidence: 0.9 },
            BioTag { start: 14, end: 19, tag: "I-NAME".into(), confidence: 0.9 },
            BioTag { start: 20, end: 23, tag: "I-NAME".into(), confidence: 0.9 },
        ];
        let spans = merge_bio_tags(&tags, text, 0);
        assert_eq!(spans[0].text, "John Smith");
    }

    #[test]
    fn chunk_text_splits_long_input_with_overlap() {
        let text = "a. ".repeat(1000);
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks[0].1.len() <= CHUNK_SIZE + 5);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("short note");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, 0);
    }

    #[test]
    fn dedup_cross_chunk_keeps_higher_confidence_overlap() {
        let low = Span::new(0, 10, "0123456789", "NAME", 0.5, "ml_ner", Tier::Ml);
        let high = Span::new(5, 15, "5678901234", "NAME", 0.9, "ml_ner", Tier::Ml);
        let out = dedup_cross_chunk(vec![low, high.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }
}
