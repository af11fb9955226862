//! # zhner Core
//!
//! Unifies three Chinese named-entity corpora (Weibo NER, BosonNLP, MSRA)
//! into one character-level BIO dataset and provides the task heads trained
//! on top of a shared encoder: CRF sequence tagging, classification and
//! masked-token pretraining.
//!
//! ## Quick Start
//!
//! ```rust
//! use zhner_core::corpus::{AnnotationFormat, BracketMarkupParser};
//! use zhner_core::labels::{LabelEncoder, LabelSource, NER_ALPHABET};
//!
//! let parser = BracketMarkupParser::new().unwrap();
//! let sentences = parser.parse("{{location:北京}}市").unwrap();
//! assert_eq!(sentences[0].labels, ["B-LOC", "I-LOC", "O"]);
//!
//! let encoder = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
//! assert_eq!(encoder.encode("O").unwrap(), 0);
//! assert_eq!(encoder.decode(encoder.encode("B-LOC").unwrap()).unwrap(), "B-LOC");
//! ```
pub mod corpus;
pub mod crf;
pub mod error;
pub mod features;
pub mod heads;
pub mod labels;
pub mod metrics;
pub mod tasks;
pub mod types;

// Re-export primary API
pub use corpus::{
    AnnotationFormat, BracketMarkupParser, CorpusConfig, CorpusSplit, CorpusUnifier, Document,
    SegmentTagParser, Sentence, SlashTagParser, SuffixTagParser,
};
pub use crf::ViterbiDecoder;
pub use error::{Result, ZhnerError};
pub use features::{CharVocab, FeatureBuilder, Features, PretrainingConfig, TaskSpec};
pub use heads::{
    ClassificationHead, Encoder, EvalOutput, HeadConfig, HiddenBundle, MaskedLmHead, PretrainHead,
    SequenceTagHead, TaskHead,
};
pub use labels::{BioTag, Entity, EntityCode, LabelEncoder, LabelRegistry, LabelSource};
pub use tasks::{Example, HeadKind, Target, Task, TaskData};
pub use types::Mode;
