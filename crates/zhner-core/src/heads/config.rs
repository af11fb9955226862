use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use candle_nn::Activation;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZhnerError};

/// Hyperparameters of the task heads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    /// Probability of keeping a unit under training-time dropout.
    pub keep_prob: f32,
    /// Width of the encoder's hidden vectors.
    pub hidden_size: usize,
    /// Rows of the tied embedding table.
    pub vocab_size: usize,
    /// Activation of the masked-token transform.
    pub hidden_act: Activation,
    /// Standard deviation of weight initialisation.
    pub initializer_range: f64,
    pub layer_norm_eps: f64,
    /// Class counts overriding the label encoder's alphabet size, per task.
    pub num_classes: BTreeMap<String, usize>,
    /// Forbid ill-formed BIO transitions when decoding.
    pub bio_constraints: bool,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            keep_prob: 0.9,
            hidden_size: 768,
            vocab_size: 21128,
            hidden_act: Activation::Gelu,
            initializer_range: 0.02,
            layer_norm_eps: 1e-12,
            num_classes: BTreeMap::new(),
            bio_constraints: false,
        }
    }
}

impl HeadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ZhnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_keep_prob(mut self, keep_prob: f32) -> Self {
        self.keep_prob = keep_prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.hidden_act = activation;
        self
    }

    pub fn with_num_classes(mut self, task: impl Into<String>, n: usize) -> Self {
        self.num_classes.insert(task.into(), n);
        self
    }

    pub fn with_bio_constraints(mut self, enabled: bool) -> Self {
        self.bio_constraints = enabled;
        self
    }

    /// Class count of `task`, or `default` when not overridden.
    pub fn num_classes_for(&self, task: &str, default: usize) -> usize {
        self.num_classes.get(task).copied().unwrap_or(default)
    }

    /// Training-time drop probability.
    pub fn drop_prob(&self) -> f32 {
        1.0 - self.keep_prob
    }
}
