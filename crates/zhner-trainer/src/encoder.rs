//! BERT encoder producing the hidden bundle consumed by the task heads.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config};
use serde::Deserialize;
use zhner_core::features::{INPUT_IDS, INPUT_MASK, SEGMENT_IDS};
use zhner_core::heads::{Encoder, HiddenBundle};
use zhner_core::{Features, Mode};

/// Sizes the heads need from the encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EncoderDims {
    pub vocab_size: usize,
    pub hidden_size: usize,
}

/// A Hugging Face BERT `config.json`.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub bert: Config,
    pub dims: EncoderDims,
}

impl EncoderConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read encoder config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid encoder config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self {
            bert: serde_json::from_str(text)?,
            dims: serde_json::from_str(text)?,
        })
    }
}

/// BERT body plus pooler; the word-embedding table is exposed for weight tying.
pub struct BertEncoder {
    model: BertModel,
    pooler: Linear,
    embed_table: Tensor,
}

impl BertEncoder {
    /// Build under `vb`, which should point at the `bert` prefix.
    pub fn load(config: &EncoderConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let EncoderDims {
            vocab_size,
            hidden_size,
        } = config.dims;
        let model = BertModel::load(vb.clone(), &config.bert)?;
        let embed_table = vb
            .pp("embeddings")
            .pp("word_embeddings")
            .get((vocab_size, hidden_size), "weight")?;
        let pooler = candle_nn::linear(hidden_size, hidden_size, vb.pp("pooler").pp("dense"))?;
        Ok(Self {
            model,
            pooler,
            embed_table,
        })
    }

    /// `(vocab, hidden)` of the embedding table.
    pub fn dims(&self) -> candle_core::Result<(usize, usize)> {
        self.embed_table.dims2()
    }
}

impl Encoder for BertEncoder {
    fn encode(&self, features: &Features, _mode: Mode) -> zhner_core::Result<HiddenBundle> {
        let input_ids = features.get(INPUT_IDS)?;
        let segment_ids = features.get(SEGMENT_IDS)?;
        let mask = features.get(INPUT_MASK)?;

        let seq = self.model.forward(input_ids, segment_ids, Some(mask))?;
        let first = seq.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&first)?.tanh()?;

        Ok(HiddenBundle {
            pooled,
            seq,
            embed_table: self.embed_table.clone(),
        })
    }
}
