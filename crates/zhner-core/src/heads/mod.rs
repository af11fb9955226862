//! # Task Heads
//!
//! Heads turn the encoder's [`HiddenBundle`] plus a [`Features`] dictionary
//! into a training loss, an evaluation loss with metrics, or predictions.
//! Each head owns its parameters; the encoder is shared.

pub mod classify;
pub mod config;
pub mod pretrain;
pub mod seq_tag;

use std::collections::BTreeMap;

use candle_core::{D, DType, Tensor};
use candle_nn::{Init, Linear, VarBuilder};

use crate::error::Result;
use crate::features::Features;
use crate::types::Mode;

pub use classify::ClassificationHead;
pub use config::HeadConfig;
pub use pretrain::{MaskedLmHead, PretrainHead};
pub use seq_tag::SequenceTagHead;

/// Encoder output consumed by the heads. Read-only.
#[derive(Debug, Clone)]
pub struct HiddenBundle {
    /// `[batch, hidden]` per-sequence vector.
    pub pooled: Tensor,
    /// `[batch, seq_len, hidden]` per-position vectors.
    pub seq: Tensor,
    /// `[vocab, hidden]` input embedding table, tied into the masked-token head.
    pub embed_table: Tensor,
}

/// Loss and named scalar metrics of one evaluation batch.
#[derive(Debug, Clone)]
pub struct EvalOutput {
    pub metrics: BTreeMap<String, f32>,
    pub loss: Tensor,
}

/// One task's view of the shared encoder.
pub trait TaskHead {
    type Prediction;

    /// Task name, used to find `<task>_label_ids` and `<task>_loss_multiplier`.
    fn task(&self) -> &str;

    fn compute_train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor>;

    fn compute_eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput>;

    fn predict(&self, hidden: &HiddenBundle, features: &Features) -> Result<Self::Prediction>;
}

/// Shared text encoder producing the hidden bundle.
pub trait Encoder {
    fn encode(&self, features: &Features, mode: Mode) -> Result<HiddenBundle>;
}

/// Linear layer with normal(0, `init_range`) weights and zero bias.
pub(crate) fn dense(
    in_dim: usize,
    out_dim: usize,
    init_range: f64,
    vb: VarBuilder,
) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: init_range,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// `-log p(id)` for each row of `log_probs` (`[n, classes]`), given `ids` (`[n]`).
pub(crate) fn negative_log_likelihood(log_probs: &Tensor, ids: &Tensor) -> Result<Tensor> {
    let ids = ids.to_dtype(DType::U32)?.unsqueeze(1)?;
    Ok(log_probs.gather(&ids, 1)?.squeeze(1)?.neg()?)
}

/// Host copy of a rank-2 float tensor, flattened row-major.
pub(crate) fn host_f32(t: &Tensor) -> Result<Vec<f32>> {
    Ok(t.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?)
}

/// Host copy of an id tensor, flattened row-major.
pub(crate) fn host_u32(t: &Tensor) -> Result<Vec<u32>> {
    Ok(t.to_dtype(DType::U32)?.flatten_all()?.to_vec1()?)
}

pub(crate) fn softmax_last(t: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax_last_dim(t)?)
}

pub(crate) fn log_softmax_last(t: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::log_softmax(t, D::Minus1)?)
}
