//! # BIO Tags for Chinese Named Entity Recognition
//!
//! The shared tag alphabet every corpus normalizes into. Entity spans are
//! never stored; they are recovered from B/I/O transitions on demand.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Background label shared by every entity task.
pub const OUTSIDE: &str = "O";

/// Fixed alphabet of the joint NER task, zero class first.
pub const NER_ALPHABET: [&str; 9] = [
    "O", "B-LOC", "B-PER", "B-ORG", "B-PRD", "I-LOC", "I-PER", "I-ORG", "I-PRD",
];

/// Entity types kept after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityCode {
    /// Locations, including geopolitical entities.
    Loc,
    /// Person names.
    Per,
    /// Organizations and companies.
    Org,
    /// Products.
    Prd,
}

impl EntityCode {
    /// Short code used inside label strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCode::Loc => "LOC",
            EntityCode::Per => "PER",
            EntityCode::Org => "ORG",
            EntityCode::Prd => "PRD",
        }
    }

    /// Parse a short code. `GPE` folds into [`EntityCode::Loc`].
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "LOC" | "GPE" => Some(EntityCode::Loc),
            "PER" => Some(EntityCode::Per),
            "ORG" => Some(EntityCode::Org),
            "PRD" => Some(EntityCode::Prd),
            _ => None,
        }
    }
}

impl fmt::Display for EntityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One character-level BIO tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BioTag {
    /// First character of an entity span.
    Begin(EntityCode),
    /// Continuation character of the span started by a matching `Begin`.
    Inside(EntityCode),
    /// Background.
    Outside,
}

impl BioTag {
    /// Tag for the character at `offset` within an entity of type `code`.
    pub fn for_offset(code: EntityCode, offset: usize) -> Self {
        if offset == 0 {
            BioTag::Begin(code)
        } else {
            BioTag::Inside(code)
        }
    }

    /// Tags for an entity of `len` characters.
    pub fn span(code: EntityCode, len: usize) -> impl Iterator<Item = BioTag> {
        (0..len).map(move |offset| BioTag::for_offset(code, offset))
    }

    /// Parse a label string, mapping anything outside the alphabet to `O`.
    pub fn parse_lenient(label: &str) -> Self {
        label.parse().unwrap_or(BioTag::Outside)
    }

    /// Get the entity type for this tag.
    pub fn entity_code(&self) -> Option<EntityCode> {
        match self {
            BioTag::Begin(code) | BioTag::Inside(code) => Some(*code),
            BioTag::Outside => None,
        }
    }

    /// Check if transitioning from `from` tag to `to` tag is well formed.
    pub fn is_valid_transition(from: BioTag, to: BioTag) -> bool {
        match to {
            BioTag::Inside(code) => from.entity_code() == Some(code),
            _ => true,
        }
    }
}

impl fmt::Display for BioTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioTag::Begin(code) => write!(f, "B-{code}"),
            BioTag::Inside(code) => write!(f, "I-{code}"),
            BioTag::Outside => f.write_str(OUTSIDE),
        }
    }
}

/// Error returned when a label string is not in the BIO alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBioTagError(pub String);

impl fmt::Display for ParseBioTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a BIO label: {:?}", self.0)
    }
}

impl std::error::Error for ParseBioTagError {}

impl FromStr for BioTag {
    type Err = ParseBioTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == OUTSIDE {
            return Ok(BioTag::Outside);
        }
        let err = || ParseBioTagError(s.to_string());
        let (prefix, code) = s.split_once('-').ok_or_else(err)?;
        let code = match code {
            "LOC" => EntityCode::Loc,
            "PER" => EntityCode::Per,
            "ORG" => EntityCode::Org,
            "PRD" => EntityCode::Prd,
            _ => return Err(err()),
        };
        match prefix {
            "B" => Ok(BioTag::Begin(code)),
            "I" => Ok(BioTag::Inside(code)),
            _ => Err(err()),
        }
    }
}

/// An entity recovered from a tagged character sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub code: EntityCode,
    /// Index of the first character.
    pub start: usize,
    /// One past the last character.
    pub end: usize,
    pub text: String,
}

/// Recover entity spans from parallel characters and label strings.
///
/// A stray `I-` without a matching open span starts a new entity, the
/// lenient reading most BIO scorers use.
pub fn extract_entities<S: AsRef<str>>(chars: &[char], labels: &[S]) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut open: Option<(EntityCode, usize)> = None;

    let mut close = |open: &mut Option<(EntityCode, usize)>, end: usize| {
        if let Some((code, start)) = open.take() {
            entities.push(Entity {
                code,
                start,
                end,
                text: chars[start..end].iter().collect(),
            });
        }
    };

    let len = chars.len().min(labels.len());
    for (i, label) in labels.iter().take(len).enumerate() {
        match BioTag::parse_lenient(label.as_ref()) {
            BioTag::Begin(code) => {
                close(&mut open, i);
                open = Some((code, i));
            }
            BioTag::Inside(code) => match open {
                Some((open_code, _)) if open_code == code => {}
                _ => {
                    close(&mut open, i);
                    open = Some((code, i));
                }
            },
            BioTag::Outside => close(&mut open, i),
        }
    }
    close(&mut open, len);

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_string_roundtrip() {
        for label in NER_ALPHABET {
            let tag: BioTag = label.parse().unwrap();
            assert_eq!(tag.to_string(), label);
        }
    }

    #[test]
    fn test_rejects_suffixes_and_unknown_codes() {
        assert!("B-PER.NAM".parse::<BioTag>().is_err());
        assert!("B-GPE".parse::<BioTag>().is_err());
        assert!("E-LOC".parse::<BioTag>().is_err());
        assert_eq!(BioTag::parse_lenient("B-XYZ"), BioTag::Outside);
    }

    #[test]
    fn test_gpe_folds_into_loc() {
        assert_eq!(EntityCode::from_code("GPE"), Some(EntityCode::Loc));
        assert_eq!(EntityCode::from_code("NOM"), None);
    }

    #[test]
    fn test_span_tags() {
        let tags: Vec<String> = BioTag::span(EntityCode::Per, 3).map(|t| t.to_string()).collect();
        assert_eq!(tags, ["B-PER", "I-PER", "I-PER"]);
    }

    #[test]
    fn test_valid_transitions() {
        let b_loc = BioTag::Begin(EntityCode::Loc);
        let i_loc = BioTag::Inside(EntityCode::Loc);
        let i_per = BioTag::Inside(EntityCode::Per);
        assert!(BioTag::is_valid_transition(b_loc, i_loc));
        assert!(BioTag::is_valid_transition(i_loc, i_loc));
        assert!(BioTag::is_valid_transition(i_loc, BioTag::Outside));
        assert!(!BioTag::is_valid_transition(BioTag::Outside, i_loc));
        assert!(!BioTag::is_valid_transition(b_loc, i_per));
    }

    #[test]
    fn test_extract_entities() {
        let chars: Vec<char> = "张三在北京市".chars().collect();
        let labels = ["B-PER", "I-PER", "O", "B-LOC", "I-LOC", "I-LOC"];
        let entities = extract_entities(&chars, &labels);

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].code, EntityCode::Per);
        assert_eq!(entities[0].text, "张三");
        assert_eq!((entities[1].start, entities[1].end), (3, 6));
        assert_eq!(entities[1].text, "北京市");
    }

    #[test]
    fn test_extract_adjacent_and_stray_inside() {
        let chars: Vec<char> = "甲乙丙".chars().collect();
        let labels = ["B-ORG", "B-ORG", "I-LOC"];
        let entities = extract_entities(&chars, &labels);
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[2].code, EntityCode::Loc);
    }
}
