//! Batching of examples and pretraining documents into [`Features`].

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use oorandom::Rand64;
use serde::{Deserialize, Serialize};

use crate::corpus::Document;
use crate::error::{Result, ZhnerError};
use crate::features::{
    CharVocab, Features, INPUT_IDS, INPUT_MASK, MASKED_LM_IDS, MASKED_LM_POSITIONS,
    MASKED_LM_WEIGHTS, NEXT_SENTENCE, SEGMENT_IDS, label_ids_key, loss_multiplier_key,
};
use crate::labels::LabelEncoder;
use crate::tasks::{Example, HeadKind, Target};

/// A supervised task taking part in a batch.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub kind: HeadKind,
    pub encoder: Arc<LabelEncoder>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, kind: HeadKind, encoder: Arc<LabelEncoder>) -> Self {
        Self {
            name: name.into(),
            kind,
            encoder,
        }
    }
}

/// Masking parameters of pretraining batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PretrainingConfig {
    /// Share of tokens selected for prediction.
    pub masked_lm_prob: f64,
    /// Fixed width of the masked-position tensors.
    pub max_predictions_per_seq: usize,
}

impl Default for PretrainingConfig {
    fn default() -> Self {
        Self {
            masked_lm_prob: 0.15,
            max_predictions_per_seq: 20,
        }
    }
}

/// Turns characters into padded id tensors.
pub struct FeatureBuilder {
    vocab: Arc<CharVocab>,
    max_seq_len: usize,
    device: Device,
}

impl FeatureBuilder {
    /// `max_seq_len` counts `[CLS]` and `[SEP]`, so at least 3 is needed.
    pub fn new(vocab: Arc<CharVocab>, max_seq_len: usize, device: Device) -> Self {
        Self {
            vocab,
            max_seq_len: max_seq_len.max(3),
            device,
        }
    }

    pub fn vocab(&self) -> &CharVocab {
        &self.vocab
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    fn u32_matrix(&self, rows: Vec<Vec<u32>>, width: usize) -> Result<Tensor> {
        let batch = rows.len();
        let flat: Vec<u32> = rows.into_iter().flatten().collect();
        Ok(Tensor::from_vec(flat, (batch, width), &self.device)?)
    }

    /// Build a mixed-task batch.
    ///
    /// Every task in `tasks` receives label and multiplier tensors covering
    /// the whole batch; rows owned by other tasks carry zero-class labels and
    /// multiplier 0, so each head only learns from its own examples.
    pub fn batch(&self, examples: &[Example], tasks: &[TaskSpec]) -> Result<Features> {
        let batch = examples.len();
        let chars_budget = self.max_seq_len - 2;
        let width = examples
            .iter()
            .map(|e| e.chars.len().min(chars_budget) + 2)
            .max()
            .unwrap_or(2);

        let mut input_ids = Vec::with_capacity(batch);
        let mut input_mask = Vec::with_capacity(batch);
        for example in examples {
            let n = example.chars.len().min(chars_budget);
            let mut ids = Vec::with_capacity(width);
            ids.push(self.vocab.cls_id());
            ids.extend(self.vocab.encode(&example.chars[..n]));
            ids.push(self.vocab.sep_id());
            let mut mask = vec![1u32; ids.len()];
            ids.resize(width, self.vocab.pad_id());
            mask.resize(width, 0);
            input_ids.push(ids);
            input_mask.push(mask);
        }

        let mut features = Features::new();
        features.insert(
            SEGMENT_IDS,
            Tensor::zeros((batch, width), DType::U32, &self.device)?,
        );
        features.insert(INPUT_IDS, self.u32_matrix(input_ids, width)?);
        features.insert(INPUT_MASK, self.u32_matrix(input_mask, width)?);

        for task in tasks {
            let mut multiplier = vec![0f32; batch];
            match task.kind {
                HeadKind::SequenceTag => {
                    let mut rows = vec![vec![0u32; width]; batch];
                    for (row, example) in examples.iter().enumerate() {
                        if example.task != task.name {
                            continue;
                        }
                        let Target::Tags(tags) = &example.target else {
                            return Err(target_mismatch(task, example));
                        };
                        let n = tags.len().min(example.chars.len()).min(chars_budget);
                        let ids = task.encoder.encode_all(&tags[..n])?;
                        rows[row][1..=n].copy_from_slice(&ids);
                        multiplier[row] = 1.0;
                    }
                    features.insert(label_ids_key(&task.name), self.u32_matrix(rows, width)?);
                }
                HeadKind::Classification => {
                    let mut ids = vec![0u32; batch];
                    for (row, example) in examples.iter().enumerate() {
                        if example.task != task.name {
                            continue;
                        }
                        let Target::Class(class) = &example.target else {
                            return Err(target_mismatch(task, example));
                        };
                        ids[row] = task.encoder.encode(class)?;
                        multiplier[row] = 1.0;
                    }
                    features.insert(
                        label_ids_key(&task.name),
                        Tensor::from_vec(ids, batch, &self.device)?,
                    );
                }
                HeadKind::Pretraining => {
                    return Err(ZhnerError::Shape(format!(
                        "task {} is built from documents, not examples",
                        task.name
                    )));
                }
            }
            features.insert(
                loss_multiplier_key(&task.name),
                Tensor::from_vec(multiplier, batch, &self.device)?,
            );
        }

        Ok(features)
    }

    /// Build a sentence-pair pretraining batch, one pair per document.
    ///
    /// With probability one half the second segment is the sentence that
    /// follows the first (`next_sentence` label 0), otherwise a sentence drawn
    /// from a random document (label 1). Selected tokens are replaced by
    /// `[MASK]` 80% of the time, a random id 10%, and kept 10%.
    pub fn pretraining_batch(
        &self,
        documents: &[Document],
        pool: &[Document],
        config: &PretrainingConfig,
        rng: &mut Rand64,
    ) -> Result<Features> {
        let batch = documents.len();
        let max_predictions = config.max_predictions_per_seq;
        let pair_budget = self.max_seq_len.saturating_sub(3).max(2);

        let mut pairs = Vec::with_capacity(batch);
        let mut next_labels = Vec::with_capacity(batch);
        for document in documents {
            if document.is_empty() {
                return Err(ZhnerError::Shape("empty pretraining document".into()));
            }
            let first = rng.rand_range(0..document.len() as u64) as usize;
            let a = document[first].clone();
            let follows = first + 1 < document.len() && rng.rand_float() < 0.5;
            let (b, label) = if follows {
                (document[first + 1].clone(), 0u32)
            } else {
                (random_sentence(pool, documents, rng), 1u32)
            };
            pairs.push(truncate_pair(a, b, pair_budget, rng));
            next_labels.push(label);
        }

        let width = pairs
            .iter()
            .map(|(a, b)| a.len() + b.len() + 3)
            .max()
            .unwrap_or(3);

        let mut input_ids = Vec::with_capacity(batch);
        let mut input_mask = Vec::with_capacity(batch);
        let mut segment_ids = Vec::with_capacity(batch);
        let mut positions = Vec::with_capacity(batch);
        let mut targets = Vec::with_capacity(batch);
        let mut weights = Vec::with_capacity(batch * max_predictions);

        for (a, b) in &pairs {
            let mut ids = vec![self.vocab.cls_id()];
            ids.extend(self.vocab.encode(a));
            ids.push(self.vocab.sep_id());
            let mut segments = vec![0u32; ids.len()];
            ids.extend(self.vocab.encode(b));
            ids.push(self.vocab.sep_id());
            segments.resize(ids.len(), 1);

            let (masked, picked, originals) = self.mask_tokens(ids, config, rng);
            let mut ids = masked;
            let mut mask = vec![1u32; ids.len()];
            ids.resize(width, self.vocab.pad_id());
            mask.resize(width, 0);
            segments.resize(width, 0);

            let real = picked.len();
            let mut row_positions: Vec<u32> = picked.into_iter().map(|p| p as u32).collect();
            let mut row_targets = originals;
            row_positions.resize(max_predictions, 0);
            row_targets.resize(max_predictions, 0);
            weights.extend((0..max_predictions).map(|i| if i < real { 1f32 } else { 0.0 }));

            input_ids.push(ids);
            input_mask.push(mask);
            segment_ids.push(segments);
            positions.push(row_positions);
            targets.push(row_targets);
        }

        let mut features = Features::new();
        features.insert(INPUT_IDS, self.u32_matrix(input_ids, width)?);
        features.insert(INPUT_MASK, self.u32_matrix(input_mask, width)?);
        features.insert(SEGMENT_IDS, self.u32_matrix(segment_ids, width)?);
        features.insert(MASKED_LM_POSITIONS, self.u32_matrix(positions, max_predictions)?);
        features.insert(MASKED_LM_IDS, self.u32_matrix(targets, max_predictions)?);
        features.insert(
            MASKED_LM_WEIGHTS,
            Tensor::from_vec(weights, (batch, max_predictions), &self.device)?,
        );
        features.insert(
            label_ids_key(NEXT_SENTENCE),
            Tensor::from_vec(next_labels, batch, &self.device)?,
        );
        features.insert(
            loss_multiplier_key(NEXT_SENTENCE),
            Tensor::ones(batch, DType::F32, &self.device)?,
        );
        Ok(features)
    }

    /// Select and corrupt prediction targets. Returns the corrupted ids, the
    /// chosen positions in ascending order and their original ids.
    fn mask_tokens(
        &self,
        mut ids: Vec<u32>,
        config: &PretrainingConfig,
        rng: &mut Rand64,
    ) -> (Vec<u32>, Vec<usize>, Vec<u32>) {
        let mut candidates: Vec<usize> = (0..ids.len())
            .filter(|&i| ids[i] != self.vocab.cls_id() && ids[i] != self.vocab.sep_id())
            .collect();
        for i in (1..candidates.len()).rev() {
            let j = rng.rand_range(0..(i as u64 + 1)) as usize;
            candidates.swap(i, j);
        }

        let wanted = ((ids.len() as f64) * config.masked_lm_prob).round().max(1.0) as usize;
        let mut picked: Vec<usize> = candidates
            .into_iter()
            .take(wanted.min(config.max_predictions_per_seq))
            .collect();
        picked.sort_unstable();

        let vocab_size = self.vocab.vocab_size().max(1) as u64;
        let originals = picked.iter().map(|&p| ids[p]).collect();
        for &p in &picked {
            let roll = rng.rand_float();
            if roll < 0.8 {
                ids[p] = self.vocab.mask_id();
            } else if roll < 0.9 {
                ids[p] = rng.rand_range(0..vocab_size) as u32;
            }
        }
        (ids, picked, originals)
    }
}

fn target_mismatch(task: &TaskSpec, example: &Example) -> ZhnerError {
    ZhnerError::Shape(format!(
        "task {} ({:?}) cannot take target {:?}",
        task.name, task.kind, example.target
    ))
}

/// A random sentence from `pool`, falling back to `fallback` when the pool is empty.
fn random_sentence(pool: &[Document], fallback: &[Document], rng: &mut Rand64) -> Vec<char> {
    let source = if pool.iter().any(|d| !d.is_empty()) { pool } else { fallback };
    let documents: Vec<&Document> = source.iter().filter(|d| !d.is_empty()).collect();
    if documents.is_empty() {
        return Vec::new();
    }
    let document = documents[rng.rand_range(0..documents.len() as u64) as usize];
    document[rng.rand_range(0..document.len() as u64) as usize].clone()
}

/// Trim the longer segment, from a random end, until the pair fits `budget`.
fn truncate_pair(
    mut a: Vec<char>,
    mut b: Vec<char>,
    budget: usize,
    rng: &mut Rand64,
) -> (Vec<char>, Vec<char>) {
    while a.len() + b.len() > budget {
        let longer = if a.len() >= b.len() { &mut a } else { &mut b };
        if rng.rand_float() < 0.5 {
            longer.remove(0);
        } else {
            longer.pop();
        }
    }
    (a, b)
}
