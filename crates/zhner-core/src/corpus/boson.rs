//! BosonNLP bracket markup: `…{{location:北京}}市…`, one document per line.

use regex::Regex;
use tracing::{debug, warn};

use crate::corpus::{AnnotationFormat, Sentence};
use crate::error::Result;
use crate::labels::{BioTag, EntityCode, OUTSIDE};

/// Where the corpus has to be fetched from.
pub const BOSON_DOWNLOAD: &str = "https://bosonnlp.com/resources/BosonNLP_NER_6C.zip";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Lines carrying this sequence are known to be broken in the release.
const CORRUPTION_MARKER: &str = "}}}}";

/// Map a BosonNLP entity type onto the shared alphabet.
pub fn project_type(entity_type: &str) -> Option<EntityCode> {
    match entity_type {
        "person_name" => Some(EntityCode::Per),
        "company_name" => Some(EntityCode::Org),
        "location" => Some(EntityCode::Loc),
        "product_name" => Some(EntityCode::Prd),
        _ => None,
    }
}

/// Parser for the bracket-markup format.
pub struct BracketMarkupParser {
    sentence_split: Regex,
}

impl BracketMarkupParser {
    /// Constructs a parser with its sentence-splitting pattern compiled.
    pub fn new() -> Result<Self> {
        Ok(Self {
            sentence_split: Regex::new(r"[!?。？！]")?,
        })
    }

    /// Parse one markup fragment that followed a `{{` (or began the sentence).
    fn push_fragment(sentence: &mut Sentence, fragment: &str) {
        let parsed = fragment
            .split_once(CLOSE)
            .and_then(|(entity, rest)| entity.split_once(':').map(|(ty, text)| (ty, text, rest)));

        let Some((entity_type, entity_text, rest)) = parsed else {
            sentence.push_plain(fragment, OUTSIDE);
            return;
        };

        match project_type(entity_type) {
            Some(code) => {
                for (c, tag) in entity_text.chars().zip(BioTag::span(code, usize::MAX)) {
                    sentence.push(c, tag.to_string());
                }
            }
            None => sentence.push_plain(entity_text, OUTSIDE),
        }
        sentence.push_plain(rest, OUTSIDE);
    }

    /// Parse one document line into its sentences.
    pub fn parse_document(&self, line: &str) -> Vec<Sentence> {
        self.sentence_split
            .split(line)
            .map(|chunk| {
                let mut sentence = Sentence::default();
                for fragment in chunk.split(OPEN) {
                    Self::push_fragment(&mut sentence, fragment);
                }
                sentence.assert_aligned();
                sentence
            })
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl AnnotationFormat for BracketMarkupParser {
    fn name(&self) -> &'static str {
        "boson"
    }

    fn parse(&self, content: &str) -> Result<Vec<Sentence>> {
        let mut sentences = Vec::new();
        let mut skipped = 0usize;

        for line in content.lines() {
            if line.contains(CORRUPTION_MARKER) {
                skipped += 1;
                continue;
            }
            sentences.extend(self.parse_document(line));
        }

        if skipped > 0 {
            warn!(skipped, "skipped corrupted BosonNLP lines");
        }
        debug!(sentences = sentences.len(), "parsed BosonNLP markup");
        Ok(sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> BracketMarkupParser {
        BracketMarkupParser::new().unwrap()
    }

    #[test]
    fn location_then_plain_text() {
        let sentences = parser().parse("{{location:北京}}市").unwrap();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].chars, ['北', '京', '市']);
        assert_eq!(sentences[0].labels, ["B-LOC", "I-LOC", "O"]);
    }

    #[test]
    fn splits_on_sentence_punctuation() {
        let sentences = parser()
            .parse("{{person_name:李雷}}来了！{{company_name:腾讯}}好?")
            .unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].labels, ["B-PER", "I-PER", "O", "O"]);
        assert_eq!(sentences[1].text(), "腾讯好");
        assert_eq!(sentences[1].labels, ["B-ORG", "I-ORG", "O"]);
    }

    #[test]
    fn unknown_type_falls_back_to_outside() {
        let sentences = parser().parse("在{{time:今天}}去{{product_name:手机}}").unwrap();
        let s = &sentences[0];
        assert_eq!(s.text(), "在今天去手机");
        assert_eq!(s.labels, ["O", "O", "O", "O", "B-PRD", "I-PRD"]);
    }

    #[test]
    fn fragment_without_markup_is_plain() {
        let sentences = parser().parse("a{{b:c").unwrap();
        assert_eq!(sentences[0].text(), "ab:c");
        assert!(sentences[0].labels.iter().all(|l| l == "O"));

        let sentences = parser().parse("{{nocolon}}x").unwrap();
        assert_eq!(sentences[0].text(), "nocolon}}x");
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let sentences = parser()
            .parse("{{location:上海}}}}坏\n{{location:广州}}好")
            .unwrap();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text(), "广州好");
    }

    #[test]
    fn empty_sentences_are_dropped() {
        let sentences = parser().parse("。。好！\n\n").unwrap();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text(), "好");
    }
}
