//! Masked-token prediction and next-segment classification.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::{Activation, Init, LayerNorm, Linear, Module, VarBuilder};

use crate::error::{Result, ZhnerError};
use crate::features::{
    Features, MASKED_LM_IDS, MASKED_LM_POSITIONS, MASKED_LM_WEIGHTS, NEXT_SENTENCE,
};
use crate::heads::{
    ClassificationHead, EvalOutput, HeadConfig, HiddenBundle, TaskHead, dense, host_f32, host_u32,
    log_softmax_last, negative_log_likelihood,
};
use crate::metrics::{self, MASKED_LM_ACCURACY, MASKED_LM_LOSS};

/// Added to the weight sum so a batch without predictions divides safely.
const WEIGHT_EPSILON: f64 = 1e-5;

/// Predicts the original token at each masked position, through the
/// transposed input embedding table.
pub struct MaskedLmHead {
    dense: Linear,
    activation: Activation,
    layer_norm: LayerNorm,
    /// `[vocab]`
    output_bias: Tensor,
}

impl MaskedLmHead {
    pub fn new(config: &HeadConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        let transform = vb.pp("transform");
        Ok(Self {
            dense: dense(h, h, config.initializer_range, transform.pp("dense"))?,
            activation: config.hidden_act,
            layer_norm: candle_nn::layer_norm(h, config.layer_norm_eps, transform.pp("LayerNorm"))?,
            output_bias: vb.get_with_hints(config.vocab_size, "output_bias", Init::Const(0.0))?,
        })
    }

    /// Hidden vectors at the masked positions, `[batch * max_predictions, hidden]`.
    ///
    /// Rows are gathered from the flattened `[batch * seq_len, hidden]` view
    /// at offsets `b * seq_len + position`.
    fn gather_positions(seq: &Tensor, positions: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden) = seq.dims3()?;
        let (pos_batch, per_row) = positions.dims2()?;
        if pos_batch != batch {
            return Err(ZhnerError::Shape(format!(
                "{pos_batch} rows of masked positions for a batch of {batch}"
            )));
        }

        let positions = host_u32(positions)?;
        if let Some(bad) = positions.iter().find(|&&pos| pos as usize >= seq_len) {
            return Err(ZhnerError::Shape(format!(
                "masked position {bad} outside a sequence of length {seq_len}"
            )));
        }
        let offsets: Vec<u32> = positions
            .into_iter()
            .enumerate()
            .map(|(i, pos)| (i / per_row * seq_len) as u32 + pos)
            .collect();
        let index = Tensor::new(offsets.as_slice(), seq.device())?;
        Ok(seq.reshape((batch * seq_len, hidden))?.index_select(&index, 0)?)
    }

    /// `[batch * max_predictions, vocab]` log-probabilities.
    pub fn log_probs(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let gathered = Self::gather_positions(&hidden.seq, features.get(MASKED_LM_POSITIONS)?)?;
        let transformed = self.activation.forward(&self.dense.forward(&gathered)?)?;
        let normed = self.layer_norm.forward(&transformed)?;
        let logits = normed
            .matmul(&hidden.embed_table.t()?)?
            .broadcast_add(&self.output_bias)?;
        log_softmax_last(&logits)
    }

    /// Per-prediction negative log-likelihood and weights, both flattened.
    fn nll_and_weights(
        &self,
        hidden: &HiddenBundle,
        features: &Features,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let log_probs = self.log_probs(hidden, features)?;
        let ids = features.get(MASKED_LM_IDS)?.flatten_all()?;
        let weights = features
            .get(MASKED_LM_WEIGHTS)?
            .flatten_all()?
            .to_dtype(log_probs.dtype())?;
        let nll = negative_log_likelihood(&log_probs, &ids)?;
        Ok((nll, weights, log_probs))
    }

    /// `Σ w·nll / (Σ w + ε)`.
    fn weighted_loss(nll: &Tensor, weights: &Tensor) -> Result<Tensor> {
        let numerator = (nll * weights)?.sum_all()?;
        let denominator = (weights.sum_all()? + WEIGHT_EPSILON)?;
        Ok((numerator / denominator)?)
    }
}

impl TaskHead for MaskedLmHead {
    type Prediction = Tensor;

    fn task(&self) -> &str {
        "masked_lm"
    }

    fn compute_train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let (nll, weights, _) = self.nll_and_weights(hidden, features)?;
        Self::weighted_loss(&nll, &weights)
    }

    fn compute_eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput> {
        let (nll, weights, log_probs) = self.nll_and_weights(hidden, features)?;
        let loss = Self::weighted_loss(&nll, &weights)?;

        let vocab = log_probs.dim(1)?;
        let predictions = metrics::argmax_rows(&host_f32(&log_probs)?, vocab);
        let ids = host_u32(features.get(MASKED_LM_IDS)?)?;
        let w = host_f32(&weights)?;

        let mut scores = BTreeMap::new();
        scores.insert(
            MASKED_LM_ACCURACY.to_string(),
            metrics::accuracy(&ids, &predictions, &w),
        );
        scores.insert(
            MASKED_LM_LOSS.to_string(),
            metrics::weighted_mean(&host_f32(&nll)?, &w),
        );
        Ok(EvalOutput {
            metrics: scores,
            loss,
        })
    }

    fn predict(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        self.log_probs(hidden, features)
    }
}

/// Masked-token head paired with a binary next-segment classifier.
pub struct PretrainHead {
    masked_lm: MaskedLmHead,
    next_sentence: ClassificationHead,
}

impl PretrainHead {
    pub fn new(config: &HeadConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            masked_lm: MaskedLmHead::new(config, vb.pp("predictions"))?,
            next_sentence: ClassificationHead::new(
                NEXT_SENTENCE,
                2,
                config,
                vb.pp("seq_relationship"),
            )?,
        })
    }

    pub fn masked_lm(&self) -> &MaskedLmHead {
        &self.masked_lm
    }

    pub fn next_sentence(&self) -> &ClassificationHead {
        &self.next_sentence
    }
}

impl TaskHead for PretrainHead {
    type Prediction = Tensor;

    fn task(&self) -> &str {
        "pretrain"
    }

    /// Sum of the masked-token and next-segment losses.
    fn compute_train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let mlm = self.masked_lm.compute_train_loss(hidden, features)?;
        let nsp = self.next_sentence.compute_train_loss(hidden, features)?;
        Ok((mlm + nsp)?)
    }

    /// Metrics of both sub-heads merged, losses summed.
    fn compute_eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput> {
        let mlm = self.masked_lm.compute_eval(hidden, features)?;
        let nsp = self.next_sentence.compute_eval(hidden, features)?;
        let mut metrics = mlm.metrics;
        metrics.extend(nsp.metrics);
        Ok(EvalOutput {
            metrics,
            loss: (mlm.loss + nsp.loss)?,
        })
    }

    /// Only the masked-token log-probabilities.
    fn predict(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        self.masked_lm.predict(hidden, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{INPUT_MASK, label_ids_key, loss_multiplier_key};
    use crate::heads::test_support::{bundle, scalar};
    use crate::metrics::{ACCURACY, F1_SCORE};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    const HIDDEN: usize = 8;
    const VOCAB: usize = 12;

    fn config() -> HeadConfig {
        HeadConfig::new()
            .with_hidden_size(HIDDEN)
            .with_vocab_size(VOCAB)
            .with_keep_prob(1.0)
    }

    fn features(weights: [[f32; 3]; 2]) -> Features {
        let dev = Device::Cpu;
        let mut f = Features::new();
        f.insert(INPUT_MASK, Tensor::ones((2, 5), DType::U32, &dev).unwrap());
        f.insert(
            MASKED_LM_POSITIONS,
            Tensor::new(&[[1u32, 3, 0], [2, 0, 0]], &dev).unwrap(),
        );
        f.insert(MASKED_LM_IDS, Tensor::new(&[[4u32, 7, 0], [9, 0, 0]], &dev).unwrap());
        f.insert(MASKED_LM_WEIGHTS, Tensor::new(&weights, &dev).unwrap());
        f.insert(label_ids_key(NEXT_SENTENCE), Tensor::new(&[0u32, 1], &dev).unwrap());
        f.insert(
            loss_multiplier_key(NEXT_SENTENCE),
            Tensor::new(&[1f32, 1.0], &dev).unwrap(),
        );
        f
    }

    #[test]
    fn pretrain_loss_is_sum_of_parts() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = PretrainHead::new(&config(), vb).unwrap();
        let hidden = bundle(2, 5, HIDDEN, VOCAB);
        let f = features([[1.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);

        let total = scalar(&head.compute_train_loss(&hidden, &f).unwrap());
        let mlm = scalar(&head.masked_lm().compute_train_loss(&hidden, &f).unwrap());
        let nsp = scalar(&head.next_sentence().compute_train_loss(&hidden, &f).unwrap());
        assert!((total - (mlm + nsp)).abs() < 1e-5);

        let eval = head.compute_eval(&hidden, &f).unwrap();
        assert!((scalar(&eval.loss) - total).abs() < 1e-5);
        for key in [MASKED_LM_ACCURACY, MASKED_LM_LOSS, ACCURACY, F1_SCORE] {
            assert!(eval.metrics.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn padding_predictions_are_ignored() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = MaskedLmHead::new(&config(), vb).unwrap();
        let hidden = bundle(2, 5, HIDDEN, VOCAB);

        let weighted = features([[1.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        let loss = scalar(&head.compute_train_loss(&hidden, &weighted).unwrap());
        let eval = head.compute_eval(&hidden, &weighted).unwrap();
        assert!((eval.metrics[MASKED_LM_LOSS] - loss).abs() < 1e-3);

        let none = features([[0.0; 3]; 2]);
        assert_eq!(scalar(&head.compute_train_loss(&hidden, &none).unwrap()), 0.0);
    }

    #[test]
    fn predict_returns_log_probs_per_slot() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = PretrainHead::new(&config(), vb).unwrap();
        let hidden = bundle(2, 5, HIDDEN, VOCAB);
        let log_probs = head.predict(&hidden, &features([[1.0; 3]; 2])).unwrap();
        assert_eq!(log_probs.dims(), [6, VOCAB]);
        for row in log_probs.exp().unwrap().to_vec2::<f32>().unwrap() {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let dev = Device::Cpu;
        let seq = Tensor::zeros((1, 3, HIDDEN), DType::F32, &dev).unwrap();
        let positions = Tensor::new(&[[5u32]], &dev).unwrap();
        assert!(MaskedLmHead::gather_positions(&seq, &positions).is_err());
    }

    #[test]
    fn position_past_its_own_row_is_rejected() {
        // Offset 4 is inside the flattened batch but belongs to example 1.
        let dev = Device::Cpu;
        let seq = Tensor::zeros((2, 3, HIDDEN), DType::F32, &dev).unwrap();
        let positions = Tensor::new(&[[4u32], [0]], &dev).unwrap();
        assert!(matches!(
            MaskedLmHead::gather_positions(&seq, &positions),
            Err(ZhnerError::Shape(_))
        ));
    }

    #[test]
    fn gather_uses_flattened_offsets() {
        let dev = Device::Cpu;
        let seq = Tensor::arange(0f32, 12.0, &dev).unwrap().reshape((2, 3, 2)).unwrap();
        let positions = Tensor::new(&[[2u32], [1]], &dev).unwrap();
        let rows = MaskedLmHead::gather_positions(&seq, &positions).unwrap();
        assert_eq!(rows.to_vec2::<f32>().unwrap(), vec![vec![4.0, 5.0], vec![8.0, 9.0]]);
    }
}
