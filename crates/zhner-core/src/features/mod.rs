//! # Feature Dictionary
//!
//! Named tensors handed from batching to the encoder and the task heads.
//! Per-task entries are keyed `<task>_label_ids` and `<task>_loss_multiplier`.

pub mod builder;
pub mod vocab;

use std::collections::BTreeMap;

use candle_core::{DType, Tensor};

use crate::error::{Result, ZhnerError};

pub use builder::{FeatureBuilder, PretrainingConfig, TaskSpec};
pub use vocab::CharVocab;

/// `[batch, seq_len]` token ids.
pub const INPUT_IDS: &str = "input_ids";
/// `[batch, seq_len]`, 1 on real tokens and 0 on padding.
pub const INPUT_MASK: &str = "input_mask";
/// `[batch, seq_len]` sentence-pair segment ids.
pub const SEGMENT_IDS: &str = "segment_ids";
/// `[batch, max_predictions]` positions of masked tokens.
pub const MASKED_LM_POSITIONS: &str = "masked_lm_positions";
/// `[batch, max_predictions]` original ids at masked positions.
pub const MASKED_LM_IDS: &str = "masked_lm_ids";
/// `[batch, max_predictions]`, 1.0 on real predictions and 0.0 on padding.
pub const MASKED_LM_WEIGHTS: &str = "masked_lm_weights";
/// Task name of the next-segment classifier inside pretraining.
pub const NEXT_SENTENCE: &str = "next_sentence";

pub fn label_ids_key(task: &str) -> String {
    format!("{task}_label_ids")
}

pub fn loss_multiplier_key(task: &str) -> String {
    format!("{task}_loss_multiplier")
}

/// A batch of named tensors.
#[derive(Debug, Clone, Default)]
pub struct Features {
    tensors: BTreeMap<String, Tensor>,
}

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(key.into(), tensor);
    }

    /// Look up a feature, failing with [`ZhnerError::MissingFeature`].
    pub fn get(&self, key: &str) -> Result<&Tensor> {
        self.tensors
            .get(key)
            .ok_or_else(|| ZhnerError::MissingFeature(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn label_ids(&self, task: &str) -> Result<&Tensor> {
        self.get(&label_ids_key(task))
    }

    pub fn loss_multiplier(&self, task: &str) -> Result<&Tensor> {
        self.get(&loss_multiplier_key(task))
    }

    /// Valid length of every example, the row sums of `input_mask`.
    pub fn sequence_lengths(&self) -> Result<Vec<usize>> {
        let lengths: Vec<f32> = self
            .get(INPUT_MASK)?
            .to_dtype(DType::F32)?
            .sum(1)?
            .to_vec1()?;
        Ok(lengths.into_iter().map(|l| l.round() as usize).collect())
    }

    /// Number of real (non-padding) tokens in the batch.
    pub fn token_count(&self) -> Result<usize> {
        let total = self
            .get(INPUT_MASK)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        Ok(total.round() as usize)
    }

    /// Batch size, read from `input_mask`.
    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.get(INPUT_MASK)?.dim(0)?)
    }
}
