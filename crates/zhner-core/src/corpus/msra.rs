//! MSRA slash-tagged format: `张三/nr 在/p 北京/ns`, one sentence per line.

use tracing::debug;

use crate::corpus::{AnnotationFormat, Sentence};
use crate::error::Result;
use crate::labels::{BioTag, EntityCode, OUTSIDE};

/// Map an MSRA part-of-speech code onto an entity type.
pub fn project_pos(pos: &str) -> Option<EntityCode> {
    match pos {
        "nr" => Some(EntityCode::Per),
        "nt" => Some(EntityCode::Org),
        "ns" => Some(EntityCode::Loc),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlashTagParser;

impl SlashTagParser {
    /// Parse one line of `word/pos` tokens.
    pub fn parse_line(&self, line: &str) -> Sentence {
        let mut sentence = Sentence::default();

        // Tokens are separated by ASCII spaces only; the ideographic space
        // is itself a token in this corpus.
        for token in line.split(' ').filter(|t| !t.is_empty()) {
            let (word, code) = match token.rsplit_once('/') {
                Some((word, pos)) => (word, project_pos(pos)),
                None => (token, None),
            };
            match code {
                Some(code) => {
                    for (c, tag) in word.chars().zip(BioTag::span(code, usize::MAX)) {
                        sentence.push(c, tag.to_string());
                    }
                }
                None => sentence.push_plain(word, OUTSIDE),
            }
        }

        sentence.assert_aligned();
        sentence
    }
}

impl AnnotationFormat for SlashTagParser {
    fn name(&self) -> &'static str {
        "msra"
    }

    fn parse(&self, content: &str) -> Result<Vec<Sentence>> {
        let sentences: Vec<Sentence> = content
            .lines()
            .map(|line| self.parse_line(line.trim_end_matches('\r')))
            .filter(|s| !s.is_empty())
            .collect();
        debug!(sentences = sentences.len(), "parsed MSRA slash tags");
        Ok(sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_plain_location() {
        let s = SlashTagParser.parse_line("张三/nr 在/p 北京/ns");
        assert_eq!(s.chars, ['张', '三', '在', '北', '京']);
        assert_eq!(s.labels, ["B-PER", "I-PER", "O", "B-LOC", "I-LOC"]);
    }

    #[test]
    fn organization_and_repeated_spaces() {
        let s = SlashTagParser.parse_line("新华社/nt  报道/v ");
        assert_eq!(s.labels, ["B-ORG", "I-ORG", "I-ORG", "O", "O"]);
    }

    #[test]
    fn token_without_slash_is_plain() {
        let s = SlashTagParser.parse_line("你好 世界/n");
        assert_eq!(s.text(), "你好世界");
        assert!(s.labels.iter().all(|l| l == "O"));
    }

    #[test]
    fn word_containing_slash_splits_on_last() {
        let s = SlashTagParser.parse_line("1/2/m");
        assert_eq!(s.text(), "1/2");
        assert_eq!(s.labels.len(), 3);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let sentences = SlashTagParser.parse("张三/nr\n\n \n李四/nr\r\n").unwrap();
        assert_eq!(sentences.len(), 2);
    }
}
