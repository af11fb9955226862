//! Weibo NER (Golden Horse) column format.
//!
//! Each line is `<char><segment-position>\t<tag>`, blank lines separate
//! sentences. Tags carry a mention-kind suffix, e.g. `B-PER.NAM` (named) or
//! `B-LOC.NOM` (nominal); only named mentions are kept.

use tracing::debug;

use crate::corpus::{AnnotationFormat, Sentence};
use crate::error::{Result, ZhnerError};
use crate::labels::{BioTag, EntityCode, OUTSIDE};

/// Marker of a named (as opposed to nominal) mention.
const NAMED_MARKER: &str = "NAM";

/// Background label of the segmentation variant.
pub const SEGMENT_BACKGROUND: &str = "0";

/// Named-entity labels from the tag column.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixTagParser;

/// Word-segmentation position (`0`, `1`, `2`) from the first column.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentTagParser;

/// Normalize a raw Weibo tag into the shared alphabet.
///
/// Nominal mentions become `O`, the `.NAM` suffix is dropped and `GPE`
/// folds into `LOC`. Anything still outside the alphabet falls back to `O`.
pub fn normalize_entity_tag(raw: &str) -> BioTag {
    if !raw.contains(NAMED_MARKER) {
        return BioTag::Outside;
    }
    let stripped = raw.replace(".NAM", "");
    let Some((prefix, code)) = stripped.split_once('-') else {
        return BioTag::Outside;
    };
    match (prefix, EntityCode::from_code(code)) {
        ("B", Some(code)) => BioTag::Begin(code),
        ("I", Some(code)) => BioTag::Inside(code),
        _ => BioTag::Outside,
    }
}

/// Segmentation tag from the trailing character of the first column.
pub fn segment_tag(first_column: &str) -> &'static str {
    match first_column.chars().last() {
        Some('1') => "1",
        Some('2') => "2",
        _ => SEGMENT_BACKGROUND,
    }
}

/// Walk the column file, handing each non-blank line's columns to `label`.
fn parse_columns<F>(content: &str, mut label: F) -> Result<Vec<Sentence>>
where
    F: FnMut(usize, &str, &str) -> Result<String>,
{
    let mut sentences = Vec::new();
    let mut current = Sentence::default();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                sentences.push(std::mem::take(&mut current));
            }
            continue;
        }

        let mut columns = line.split('\t');
        let first = columns.next().unwrap_or_default();
        let tag = columns.next().unwrap_or_default();

        let Some(c) = first.chars().next() else {
            return Err(ZhnerError::MalformedLine {
                line_no: line_no + 1,
                line: line.to_string(),
                reason: "missing character column",
            });
        };
        let tag_label = label(line_no + 1, first, tag)?;
        current.push(c, tag_label);
    }

    if !current.is_empty() {
        sentences.push(current);
    }

    for sentence in &sentences {
        sentence.assert_aligned();
    }
    Ok(sentences)
}

impl AnnotationFormat for SuffixTagParser {
    fn name(&self) -> &'static str {
        "weibo"
    }

    fn parse(&self, content: &str) -> Result<Vec<Sentence>> {
        let mut dropped = 0usize;
        let sentences = parse_columns(content, |line_no, first, tag| {
            if tag.is_empty() {
                return Err(ZhnerError::MalformedLine {
                    line_no,
                    line: first.to_string(),
                    reason: "missing tag column",
                });
            }
            let normalized = normalize_entity_tag(tag.trim());
            if normalized == BioTag::Outside && tag.trim() != OUTSIDE {
                dropped += 1;
            }
            Ok(normalized.to_string())
        })?;
        debug!(
            sentences = sentences.len(),
            dropped, "parsed weibo entity tags"
        );
        Ok(sentences)
    }
}

impl AnnotationFormat for SegmentTagParser {
    fn name(&self) -> &'static str {
        "weibo-segment"
    }

    fn background(&self) -> &'static str {
        SEGMENT_BACKGROUND
    }

    fn parse(&self, content: &str) -> Result<Vec<Sentence>> {
        parse_columns(content, |_, first, _| Ok(segment_tag(first).to_string()))
    }
}
