//! Per-position tagging under a linear-chain CRF.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::{Dropout, Init, Linear, Module, VarBuilder};

use crate::crf::{ViterbiDecoder, log_likelihood};
use crate::error::{Result, ZhnerError};
use crate::features::Features;
use crate::heads::{
    EvalOutput, HeadConfig, HiddenBundle, TaskHead, dense, host_f32, host_u32, softmax_last,
};
use crate::labels::LabelEncoder;
use crate::metrics::{self, ACCURACY, ACCURACY_PER_SEQUENCE, F1_SCORE};

pub struct SequenceTagHead {
    task: String,
    num_tags: usize,
    dropout: Dropout,
    projection: Linear,
    /// `[num_tags, num_tags]`; entry `(i, j)` scores tag `i` followed by `j`.
    transitions: Tensor,
    decoder: ViterbiDecoder,
}

impl SequenceTagHead {
    pub fn new(task: &str, num_tags: usize, config: &HeadConfig, vb: VarBuilder) -> Result<Self> {
        let projection = dense(
            config.hidden_size,
            num_tags,
            config.initializer_range,
            vb.pp("output"),
        )?;
        let transitions = vb.get_with_hints(
            (num_tags, num_tags),
            "transitions",
            Init::Randn {
                mean: 0.0,
                stdev: config.initializer_range,
            },
        )?;
        Ok(Self {
            task: task.to_string(),
            num_tags,
            dropout: Dropout::new(config.drop_prob()),
            projection,
            transitions,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    /// Build for a label alphabet, constraining decoding when the config asks for it.
    pub fn for_encoder(encoder: &LabelEncoder, config: &HeadConfig, vb: VarBuilder) -> Result<Self> {
        let task = encoder.task();
        let mut head = Self::new(task, config.num_classes_for(task, encoder.len()), config, vb)?;
        if config.bio_constraints && head.num_tags == encoder.len() {
            head.decoder = ViterbiDecoder::with_bio_constraints(encoder);
        }
        Ok(head)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    /// `[batch, seq_len, num_tags]` emission scores. Dropout applies only when `train`.
    pub fn emissions(&self, hidden: &HiddenBundle, train: bool) -> Result<Tensor> {
        let seq = self.dropout.forward(&hidden.seq, train)?;
        Ok(self.projection.forward(&seq)?)
    }

    /// Per-example CRF log-likelihood of the gold tags, `[batch]`.
    fn log_likelihood(&self, emissions: &Tensor, features: &Features) -> Result<Tensor> {
        let lengths = features.sequence_lengths()?;
        log_likelihood(
            emissions,
            features.label_ids(&self.task)?,
            &lengths,
            &self.transitions,
        )
    }
}

impl TaskHead for SequenceTagHead {
    type Prediction = Vec<Vec<u32>>;

    fn task(&self) -> &str {
        &self.task
    }

    /// Mean over the batch of `-ll * multiplier`.
    fn compute_train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let emissions = self.emissions(hidden, true)?;
        let ll = self.log_likelihood(&emissions, features)?;
        let multiplier = features.loss_multiplier(&self.task)?.to_dtype(ll.dtype())?;
        Ok((ll.neg()? * multiplier)?.mean_all()?)
    }

    /// Unweighted mean of `-ll`, with masked position accuracy, per-sequence
    /// exact match and F1 of one-hot gold tags against softmaxed emissions.
    fn compute_eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput> {
        let emissions = self.emissions(hidden, false)?;
        let (_, seq_len, _) = emissions.dims3()?;
        if seq_len == 0 {
            return Err(ZhnerError::Shape(format!(
                "cannot evaluate {} on zero-length sequences",
                self.task
            )));
        }
        let loss = self.log_likelihood(&emissions, features)?.neg()?.mean_all()?;

        let probabilities = host_f32(&softmax_last(&emissions)?)?;
        let predictions = metrics::argmax_rows(&probabilities, self.num_tags);
        let labels = host_u32(features.label_ids(&self.task)?)?;
        let lengths = features.sequence_lengths()?;

        let mask: Vec<f32> = lengths
            .iter()
            .flat_map(|&len| (0..seq_len).map(move |t| if t < len { 1.0 } else { 0.0 }))
            .collect();
        let class_mask: Vec<f32> = mask
            .iter()
            .flat_map(|&m| std::iter::repeat_n(m, self.num_tags))
            .collect();

        let gold_rows: Vec<&[u32]> = labels.chunks(seq_len).collect();
        let pred_rows: Vec<&[u32]> = predictions.chunks(seq_len).collect();

        let mut scores = BTreeMap::new();
        scores.insert(
            ACCURACY.to_string(),
            metrics::accuracy(&labels, &predictions, &mask),
        );
        scores.insert(
            ACCURACY_PER_SEQUENCE.to_string(),
            metrics::sequence_accuracy(&gold_rows, &pred_rows, &lengths),
        );
        scores.insert(
            F1_SCORE.to_string(),
            metrics::f1_score(
                &metrics::one_hot(&labels, self.num_tags),
                &probabilities,
                &class_mask,
            ),
        );
        Ok(EvalOutput {
            metrics: scores,
            loss,
        })
    }

    /// Viterbi tag ids of each example, restricted to its valid length.
    fn predict(&self, hidden: &HiddenBundle, features: &Features) -> Result<Vec<Vec<u32>>> {
        let emissions = self.emissions(hidden, false)?;
        let lengths = features.sequence_lengths()?;
        self.decoder.decode_batch(&emissions, &self.transitions, &lengths)
    }
}
