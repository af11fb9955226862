//! # Task Catalogue
//!
//! Named problems built from the unified corpora: which corpus they read,
//! which head they train, and how their label alphabet is obtained.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::unifier::Document;
use crate::corpus::weibo::SEGMENT_BACKGROUND;
use crate::corpus::{CorpusSplit, CorpusUnifier, Sentence};
use crate::error::{Result, ZhnerError};
use crate::labels::{LabelEncoder, LabelRegistry, LabelSource, NER_ALPHABET, OUTSIDE};
use crate::types::Mode;

/// Which head a task trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadKind {
    /// Per-character tags under a linear-chain CRF.
    SequenceTag,
    /// One label per sentence.
    Classification,
    /// Masked tokens plus next-segment classification.
    Pretraining,
}

/// Supervision of one example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// One label per character.
    Tags(Vec<String>),
    /// One label for the whole sequence.
    Class(String),
}

/// One supervised example owned by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub task: String,
    pub chars: Vec<char>,
    pub target: Target,
}

impl Example {
    pub fn tagged(task: &str, sentence: Sentence) -> Self {
        Self {
            task: task.to_string(),
            chars: sentence.chars,
            target: Target::Tags(sentence.labels),
        }
    }
}

/// The known tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Task {
    /// Weibo named entities.
    WeiboNer,
    /// Weibo word-segmentation positions.
    WeiboSegment,
    /// Sentence-level "contains an entity" on Weibo; exercises multi-task batches.
    WeiboFakeCls,
    /// Masked-token and next-segment pretraining on Weibo documents.
    WeiboPretrain,
    /// Joint entity tagging over Weibo, BosonNLP and MSRA.
    Ner,
}

impl Task {
    pub fn all() -> &'static [Task] {
        &[
            Task::WeiboNer,
            Task::WeiboSegment,
            Task::WeiboFakeCls,
            Task::WeiboPretrain,
            Task::Ner,
        ]
    }

    /// Name used for feature keys and label encoder files.
    pub fn name(&self) -> &'static str {
        match self {
            Task::WeiboNer => "WeiboNER",
            Task::WeiboSegment => "WeiboSegment",
            Task::WeiboFakeCls => "WeiboFakeCLS",
            Task::WeiboPretrain => "WeiboPretrain",
            Task::Ner => "NER",
        }
    }

    pub fn head_kind(&self) -> HeadKind {
        match self {
            Task::WeiboFakeCls => HeadKind::Classification,
            Task::WeiboPretrain => HeadKind::Pretraining,
            Task::WeiboNer | Task::WeiboSegment | Task::Ner => HeadKind::SequenceTag,
        }
    }

    /// The label mapped to id 0.
    pub fn zero_class(&self) -> &'static str {
        match self {
            Task::WeiboSegment | Task::WeiboFakeCls => SEGMENT_BACKGROUND,
            _ => OUTSIDE,
        }
    }

    /// Load this task's examples for `mode`, building or reusing its label encoder.
    pub fn load(
        &self,
        unifier: &CorpusUnifier,
        registry: &LabelRegistry,
        mode: Mode,
    ) -> Result<TaskData> {
        let name = self.name();
        let tagged = |split: CorpusSplit, source: LabelSource| -> Result<TaskData> {
            let encoder = registry.build_or_load(name, mode, &source, self.zero_class())?;
            let examples = split
                .into_partition(mode)
                .into_iter()
                .map(|s| Example::tagged(name, s))
                .collect();
            Ok(TaskData {
                task: *self,
                encoder: Some(encoder),
                payload: TaskPayload::Examples(examples),
            })
        };

        let data = match self {
            Task::WeiboNer => {
                let split = unifier.read_weibo_entities()?;
                let source = LabelSource::Observed(split.flat_labels(mode));
                tagged(split, source)?
            }
            Task::WeiboSegment => {
                let split = unifier.read_weibo_segments()?;
                let source = LabelSource::Observed(split.flat_labels(mode));
                tagged(split, source)?
            }
            Task::Ner => tagged(unifier.read_joint()?, LabelSource::fixed(NER_ALPHABET))?,
            Task::WeiboFakeCls => {
                let source = LabelSource::fixed(["0", "1"]);
                let encoder = registry.build_or_load(name, mode, &source, self.zero_class())?;
                let examples = unifier
                    .read_weibo_entities()?
                    .into_partition(mode)
                    .into_iter()
                    .map(|s| {
                        let class = if s.has_entity(OUTSIDE) { "1" } else { "0" };
                        Example {
                            task: name.to_string(),
                            chars: s.chars,
                            target: Target::Class(class.to_string()),
                        }
                    })
                    .collect();
                TaskData {
                    task: *self,
                    encoder: Some(encoder),
                    payload: TaskPayload::Examples(examples),
                }
            }
            Task::WeiboPretrain => TaskData {
                task: *self,
                encoder: None,
                payload: TaskPayload::Documents(unifier.read_pretraining_documents(mode)?),
            },
        };

        info!(task = name, %mode, size = data.len(), "task data loaded");
        Ok(data)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = ZhnerError;

    fn from_str(s: &str) -> Result<Self> {
        Task::all()
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ZhnerError::UnknownTask(s.to_string()))
    }
}

/// Examples or documents of one task.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Examples(Vec<Example>),
    Documents(Vec<Document>),
}

/// A task's data for one mode together with its label encoder.
#[derive(Debug, Clone)]
pub struct TaskData {
    pub task: Task,
    /// Absent for pretraining, whose targets are vocabulary ids.
    pub encoder: Option<Arc<LabelEncoder>>,
    pub payload: TaskPayload,
}

impl TaskData {
    pub fn len(&self) -> usize {
        match &self.payload {
            TaskPayload::Examples(examples) => examples.len(),
            TaskPayload::Documents(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn examples(&self) -> &[Example] {
        match &self.payload {
            TaskPayload::Examples(examples) => examples,
            TaskPayload::Documents(_) => &[],
        }
    }

    pub fn documents(&self) -> &[Document] {
        match &self.payload {
            TaskPayload::Documents(docs) => docs,
            TaskPayload::Examples(_) => &[],
        }
    }
}
