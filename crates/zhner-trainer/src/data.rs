//! Batching helpers and JSON-lines records for the trainer binaries.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use oorandom::Rand64;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use zhner_core::corpus::Document;
use zhner_core::labels::{Entity, extract_entities};
use zhner_core::tasks::{Example, Target, TaskData};

/// Fisher-Yates shuffle driven by `rng`.
pub fn shuffle<T>(items: &mut [T], rng: &mut Rand64) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Supervised examples of every task, concatenated in task order.
pub fn collect_examples<'a>(tasks: impl IntoIterator<Item = &'a TaskData>) -> Vec<Example> {
    tasks
        .into_iter()
        .flat_map(|data| data.examples().iter().cloned())
        .collect()
}

/// One line of a prepared-dataset export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRecord {
    pub task: String,
    pub partition: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Sentences of a pretraining document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sentences: Vec<String>,
}

impl PreparedRecord {
    pub fn from_example(example: &Example, partition: &str) -> Self {
        let (labels, class) = match &example.target {
            Target::Tags(tags) => (Some(tags.clone()), None),
            Target::Class(class) => (None, Some(class.clone())),
        };
        Self {
            task: example.task.clone(),
            partition: partition.to_string(),
            text: example.chars.iter().collect(),
            labels,
            class,
            sentences: Vec::new(),
        }
    }

    pub fn from_document(task: &str, document: &Document, partition: &str) -> Self {
        let sentences: Vec<String> = document.iter().map(|s| s.iter().collect()).collect();
        Self {
            task: task.to_string(),
            partition: partition.to_string(),
            text: sentences.concat(),
            labels: None,
            class: None,
            sentences,
        }
    }
}

/// Decoded tags of one predicted sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub task: String,
    pub text: String,
    pub labels: Vec<String>,
    pub entities: Vec<Entity>,
}

impl PredictionRecord {
    pub fn new(task: &str, chars: &[char], labels: Vec<String>) -> Self {
        let entities = extract_entities(chars, &labels);
        Self {
            task: task.to_string(),
            text: chars.iter().collect(),
            labels,
            entities,
        }
    }
}

/// Counts reported for one exported partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionStats {
    pub records: usize,
    pub characters: usize,
    /// Entity mentions per type, for tag-labelled records.
    pub entities: BTreeMap<String, usize>,
}

impl PartitionStats {
    pub fn observe(&mut self, record: &PreparedRecord) {
        self.records += 1;
        self.characters += record.text.chars().count();
        if let Some(labels) = &record.labels {
            let chars: Vec<char> = record.text.chars().collect();
            for entity in extract_entities(&chars, labels) {
                *self.entities.entry(entity.code.to_string()).or_default() += 1;
            }
        }
    }
}

/// Write `records` as JSON lines, creating parent directories. Returns the count.
pub fn write_jsonl<T, I>(path: &Path, records: I) -> Result<usize>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    for record in records {
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Read JSON lines written by [`write_jsonl`].
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    BufReader::new(file)
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(|(i, line)| {
            let line = line?;
            serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), i + 1))
        })
        .collect()
}
