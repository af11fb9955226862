//! # Corpus Parsers and Unification
//!
//! Every source corpus is read through one [`AnnotationFormat`] and comes out
//! as character-level [`Sentence`]s sharing the BIO alphabet in
//! [`crate::labels::bio`].

pub mod boson;
pub mod msra;
pub mod unifier;
pub mod weibo;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Mode;

pub use boson::BracketMarkupParser;
pub use msra::SlashTagParser;
pub use unifier::{CorpusConfig, CorpusUnifier, Document, discover};
pub use weibo::{SegmentTagParser, SuffixTagParser};

/// One sentence: parallel characters and label strings.
///
/// `chars.len() == labels.len()` always holds; constructors panic otherwise,
/// since a mismatch can only come from a parser defect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub chars: Vec<char>,
    pub labels: Vec<String>,
}

impl Sentence {
    pub fn new(chars: Vec<char>, labels: Vec<String>) -> Self {
        let sentence = Self { chars, labels };
        sentence.assert_aligned();
        sentence
    }

    /// Append one labelled character.
    pub fn push(&mut self, c: char, label: impl Into<String>) {
        self.chars.push(c);
        self.labels.push(label.into());
    }

    /// Append every character of `text` with the background label.
    pub fn push_plain(&mut self, text: &str, background: &str) {
        for c in text.chars() {
            self.push(c, background);
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Whether any label differs from `background`.
    pub fn has_entity(&self, background: &str) -> bool {
        self.labels.iter().any(|l| l != background)
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Panic if characters and labels drifted apart.
    pub fn assert_aligned(&self) {
        assert_eq!(
            self.chars.len(),
            self.labels.len(),
            "parser emitted {} characters but {} labels for {:?}",
            self.chars.len(),
            self.labels.len(),
            self.text()
        );
    }
}

/// A native corpus annotation format.
pub trait AnnotationFormat {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Label given to characters outside any annotation.
    fn background(&self) -> &'static str {
        crate::labels::OUTSIDE
    }

    /// Parse the full text of one corpus file into sentences.
    fn parse(&self, content: &str) -> Result<Vec<Sentence>>;
}

/// Train and eval partitions of one corpus (or of several, concatenated).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSplit {
    pub train: Vec<Sentence>,
    pub eval: Vec<Sentence>,
}

impl CorpusSplit {
    /// The partition a pipeline in `mode` reads. Prediction reads eval data.
    pub fn partition(&self, mode: Mode) -> &[Sentence] {
        match mode {
            Mode::Train => &self.train,
            Mode::Eval | Mode::Predict => &self.eval,
        }
    }

    pub fn into_partition(self, mode: Mode) -> Vec<Sentence> {
        match mode {
            Mode::Train => self.train,
            Mode::Eval | Mode::Predict => self.eval,
        }
    }

    /// Append `other`'s partitions after this one's.
    pub fn extend(&mut self, other: CorpusSplit) {
        self.train.extend(other.train);
        self.eval.extend(other.eval);
    }

    /// Flattened labels of one partition, for building observed alphabets.
    pub fn flat_labels(&self, mode: Mode) -> Vec<String> {
        self.partition(mode)
            .iter()
            .flat_map(|s| s.labels.iter().cloned())
            .collect()
    }
}
