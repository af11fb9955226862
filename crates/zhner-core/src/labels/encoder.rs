//! Bidirectional label string ↔ dense id mapping.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZhnerError};

/// Where a label alphabet comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    /// Labels seen in training data; the alphabet is their distinct set, sorted.
    Observed(Vec<String>),
    /// An explicit alphabet kept in the given order. Stable across unrelated runs.
    Fixed(Vec<String>),
}

impl LabelSource {
    pub fn observed<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Observed(labels.into_iter().map(Into::into).collect())
    }

    pub fn fixed<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fixed(labels.into_iter().map(Into::into).collect())
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }
}

/// On-disk form; the reverse index is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct PersistedEncoder {
    task: String,
    zero_class: String,
    labels: Vec<String>,
}

/// Closed label alphabet for one task. Id 0 is always the zero class.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEncoder {
    task: String,
    zero_class: String,
    labels: Vec<String>,
    index: HashMap<String, u32>,
}

impl LabelEncoder {
    /// Build an alphabet for `task` from `source`, reserving id 0 for `zero_class`.
    pub fn build(task: &str, source: &LabelSource, zero_class: &str) -> Self {
        let rest: Vec<String> = match source {
            LabelSource::Observed(seen) => seen
                .iter()
                .filter(|l| l.as_str() != zero_class)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            LabelSource::Fixed(alphabet) => {
                let mut seen = BTreeSet::new();
                alphabet
                    .iter()
                    .filter(|l| l.as_str() != zero_class && seen.insert(l.as_str()))
                    .cloned()
                    .collect()
            }
        };

        let labels: Vec<String> = std::iter::once(zero_class.to_string()).chain(rest).collect();
        Self::from_parts(task.to_string(), zero_class.to_string(), labels)
    }

    fn from_parts(task: String, zero_class: String, labels: Vec<String>) -> Self {
        let index = labels
            .iter()
            .enumerate()
            .map(|(id, label)| (label.clone(), id as u32))
            .collect();
        Self {
            task,
            zero_class,
            labels,
            index,
        }
    }

    /// Task this alphabet belongs to.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// The background label, always id 0.
    pub fn zero_class(&self) -> &str {
        &self.zero_class
    }

    /// Labels in id order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    /// Label string → id.
    pub fn encode(&self, label: &str) -> Result<u32> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| ZhnerError::UnknownLabel {
                task: self.task.clone(),
                label: label.to_string(),
            })
    }

    /// Encode a whole sequence, failing on the first unknown label.
    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<u32>> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }

    /// Id → label string.
    pub fn decode(&self, id: u32) -> Result<&str> {
        self.labels
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| ZhnerError::UnknownLabelId {
                task: self.task.clone(),
                id,
            })
    }

    pub fn decode_all(&self, ids: &[u32]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| self.decode(id).map(str::to_string))
            .collect()
    }

    /// Write the alphabet as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = PersistedEncoder {
            task: self.task.clone(),
            zero_class: self.zero_class.clone(),
            labels: self.labels.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        fs::write(path, json).map_err(|source| ZhnerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read an alphabet written by [`LabelEncoder::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ZhnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let persisted: PersistedEncoder = serde_json::from_str(&content)?;
        Ok(Self::from_parts(
            persisted.task,
            persisted.zero_class,
            persisted.labels,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::bio::NER_ALPHABET;

    #[test]
    fn observed_alphabet_is_sorted_after_zero_class() {
        let source = LabelSource::observed(["I-PER", "O", "B-PER", "O", "B-LOC"]);
        let enc = LabelEncoder::build("WeiboNER", &source, "O");
        assert_eq!(enc.labels(), ["O", "B-LOC", "B-PER", "I-PER"]);
        assert_eq!(enc.encode("O").unwrap(), 0);
    }

    #[test]
    fn zero_class_is_reserved_even_if_unobserved() {
        let source = LabelSource::observed(["1", "2"]);
        let enc = LabelEncoder::build("WeiboSegment", &source, "0");
        assert_eq!(enc.encode("0").unwrap(), 0);
        assert_eq!(enc.len(), 3);
    }

    #[test]
    fn fixed_alphabet_keeps_order() {
        let enc = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
        assert_eq!(enc.labels(), NER_ALPHABET);
        assert_eq!(enc.encode("I-PRD").unwrap(), 8);
    }

    #[test]
    fn roundtrip_every_label() {
        let enc = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
        for label in enc.labels() {
            let id = enc.encode(label).unwrap();
            assert_eq!(enc.decode(id).unwrap(), label);
        }
    }

    #[test]
    fn unknown_label_and_id_fail() {
        let enc = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
        assert!(matches!(
            enc.encode("B-GPE"),
            Err(ZhnerError::UnknownLabel { .. })
        ));
        assert!(matches!(
            enc.decode(99),
            Err(ZhnerError::UnknownLabelId { id: 99, .. })
        ));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("NER_label_encoder.json");
        let enc = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
        enc.save(&path).unwrap();
        assert_eq!(LabelEncoder::load(&path).unwrap(), enc);
    }
}
