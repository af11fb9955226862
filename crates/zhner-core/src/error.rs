use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building corpora, label alphabets or running task heads.
#[derive(Debug, Error)]
pub enum ZhnerError {
    /// No corpus file matched the expected glob pattern.
    #[error(
        "no corpus files match {pattern:?}; download the corpus from {download} and place it at that path"
    )]
    CorpusNotFound {
        /// The glob pattern that matched nothing.
        pattern: String,
        /// Canonical download location of the corpus.
        download: &'static str,
    },

    /// The glob pattern itself is malformed.
    #[error("invalid corpus pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A corpus file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A corpus line does not follow its annotation format.
    #[error("malformed line {line_no} ({line:?}): {reason}")]
    MalformedLine {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    /// A label string is not part of the task's alphabet.
    #[error("unknown label {label:?} for task {task}")]
    UnknownLabel { task: String, label: String },

    /// A label id is outside the task's alphabet.
    #[error("unknown label id {id} for task {task}")]
    UnknownLabelId { task: String, id: u32 },

    /// Evaluation or inference asked for an encoder that was never trained.
    #[error("no label encoder for task {task}; build it in train mode or supply a fixed alphabet")]
    EncoderMissing { task: String },

    /// Label encoder persistence failed.
    #[error("label encoder serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A required feature is absent from the feature dictionary.
    #[error("missing feature {0:?}")]
    MissingFeature(String),

    /// Tensor shapes do not fit together.
    #[error("shape error: {0}")]
    Shape(String),

    /// Unknown pipeline mode name.
    #[error("unknown mode {0:?}; expected train, eval or predict")]
    InvalidMode(String),

    /// Unknown task name.
    #[error("unknown task {0:?}")]
    UnknownTask(String),

    /// Tokenizer collaborator failure.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for zhner operations.
pub type Result<T> = std::result::Result<T, ZhnerError>;
