//! Single-label classification over the pooled vector.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::{Dropout, Linear, Module, VarBuilder};

use crate::error::Result;
use crate::features::Features;
use crate::heads::{
    EvalOutput, HeadConfig, HiddenBundle, TaskHead, dense, host_f32, host_u32, log_softmax_last,
    negative_log_likelihood, softmax_last,
};
use crate::metrics::{self, ACCURACY, F1_SCORE};

pub struct ClassificationHead {
    task: String,
    num_classes: usize,
    dropout: Dropout,
    projection: Linear,
}

impl ClassificationHead {
    pub fn new(task: &str, num_classes: usize, config: &HeadConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            task: task.to_string(),
            num_classes,
            dropout: Dropout::new(config.drop_prob()),
            projection: dense(
                config.hidden_size,
                num_classes,
                config.initializer_range,
                vb.pp("output"),
            )?,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `[batch, classes]` unnormalised scores. Dropout applies only when `train`.
    pub fn logits(&self, hidden: &HiddenBundle, train: bool) -> Result<Tensor> {
        let pooled = self.dropout.forward(&hidden.pooled, train)?;
        Ok(self.projection.forward(&pooled)?)
    }

    /// Per-example cross-entropy, `[batch]`.
    fn cross_entropy(&self, logits: &Tensor, features: &Features) -> Result<Tensor> {
        let labels = features.label_ids(&self.task)?;
        negative_log_likelihood(&log_softmax_last(logits)?, labels)
    }
}

impl TaskHead for ClassificationHead {
    type Prediction = Tensor;

    fn task(&self) -> &str {
        &self.task
    }

    /// Mean of cross-entropy scaled by each example's loss multiplier.
    fn compute_train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let logits = self.logits(hidden, true)?;
        let xent = self.cross_entropy(&logits, features)?;
        let multiplier = features.loss_multiplier(&self.task)?.to_dtype(xent.dtype())?;
        Ok((xent * multiplier)?.mean_all()?)
    }

    /// Unweighted mean cross-entropy with accuracy and best-threshold F1.
    fn compute_eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput> {
        let logits = self.logits(hidden, false)?;
        let loss = self.cross_entropy(&logits, features)?.mean_all()?;

        let probabilities = host_f32(&softmax_last(&logits)?)?;
        let labels = host_u32(features.label_ids(&self.task)?)?;
        let predictions = metrics::argmax_rows(&probabilities, self.num_classes);
        let ones = vec![1.0; labels.len()];
        let flat_ones = vec![1.0; probabilities.len()];

        let mut scores = BTreeMap::new();
        scores.insert(
            ACCURACY.to_string(),
            metrics::accuracy(&labels, &predictions, &ones),
        );
        scores.insert(
            F1_SCORE.to_string(),
            metrics::f1_score(
                &metrics::one_hot(&labels, self.num_classes),
                &probabilities,
                &flat_ones,
            ),
        );
        Ok(EvalOutput {
            metrics: scores,
            loss,
        })
    }

    /// `[batch, classes]` softmax probabilities.
    fn predict(&self, hidden: &HiddenBundle, _features: &Features) -> Result<Tensor> {
        softmax_last(&self.logits(hidden, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{label_ids_key, loss_multiplier_key};
    use crate::heads::test_support::{bundle, scalar};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn head(varmap: &VarMap) -> ClassificationHead {
        let config = HeadConfig::new().with_hidden_size(8).with_keep_prob(1.0);
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        ClassificationHead::new("WeiboFakeCLS", 2, &config, vb).unwrap()
    }

    fn features(labels: &[u32], multiplier: &[f32]) -> Features {
        let mut f = Features::new();
        f.insert(
            label_ids_key("WeiboFakeCLS"),
            Tensor::new(labels, &Device::Cpu).unwrap(),
        );
        f.insert(
            loss_multiplier_key("WeiboFakeCLS"),
            Tensor::new(multiplier, &Device::Cpu).unwrap(),
        );
        f
    }

    #[test]
    fn zero_multiplier_gives_zero_loss() {
        let varmap = VarMap::new();
        let head = head(&varmap);
        let hidden = bundle(3, 4, 8, 10);
        let loss = head
            .compute_train_loss(&hidden, &features(&[0, 1, 1], &[0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(scalar(&loss), 0.0);
    }

    #[test]
    fn multiplier_scales_train_but_not_eval_loss() {
        let varmap = VarMap::new();
        let head = head(&varmap);
        let hidden = bundle(2, 4, 8, 10);

        let full = features(&[0, 1], &[1.0, 1.0]);
        let half = features(&[0, 1], &[0.5, 0.5]);
        let train_full = scalar(&head.compute_train_loss(&hidden, &full).unwrap());
        let train_half = scalar(&head.compute_train_loss(&hidden, &half).unwrap());
        assert!((train_half - train_full / 2.0).abs() < 1e-5);

        let eval_full = head.compute_eval(&hidden, &full).unwrap();
        let eval_half = head.compute_eval(&hidden, &half).unwrap();
        assert!((scalar(&eval_full.loss) - scalar(&eval_half.loss)).abs() < 1e-6);
        assert!((scalar(&eval_full.loss) - train_full).abs() < 1e-5);
        assert!(eval_full.metrics.contains_key(ACCURACY));
        assert!(eval_full.metrics.contains_key(F1_SCORE));
    }

    #[test]
    fn dropout_only_applies_when_training() {
        let varmap = VarMap::new();
        let config = HeadConfig::new().with_hidden_size(8).with_keep_prob(0.5);
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = ClassificationHead::new("WeiboFakeCLS", 2, &config, vb).unwrap();
        let hidden = bundle(4, 2, 8, 10);
        let f = features(&[0, 1, 1, 0], &[1.0; 4]);

        let a = head.compute_eval(&hidden, &f).unwrap();
        let b = head.compute_eval(&hidden, &f).unwrap();
        assert_eq!(scalar(&a.loss).to_bits(), scalar(&b.loss).to_bits());
        assert_eq!(a.metrics, b.metrics);
        let p1 = head.predict(&hidden, &f).unwrap().to_vec2::<f32>().unwrap();
        let p2 = head.predict(&hidden, &f).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(p1, p2);

        let plain = head.logits(&hidden, false).unwrap().to_vec2::<f32>().unwrap();
        let dropped = head.logits(&hidden, true).unwrap().to_vec2::<f32>().unwrap();
        assert_ne!(plain, dropped);
    }

    #[test]
    fn predictions_are_distributions() {
        let varmap = VarMap::new();
        let head = head(&varmap);
        let hidden = bundle(4, 2, 8, 10);
        let probs = head.predict(&hidden, &Features::new()).unwrap();
        assert_eq!(probs.dims(), [4, 2]);
        for row in probs.to_vec2::<f32>().unwrap() {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }
}
