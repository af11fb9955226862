//! # Evaluation Metrics
//!
//! Streaming-free, host-side metrics computed from one evaluation batch.
//! Every metric accepts per-element weights; zero-weight elements are ignored.

/// Position (or example) accuracy.
pub const ACCURACY: &str = "Accuracy";
/// Exact match over each sequence's valid positions.
pub const ACCURACY_PER_SEQUENCE: &str = "Accuracy Per Sequence";
/// Best F1 over a threshold sweep of one-hot labels against probabilities.
pub const F1_SCORE: &str = "F1 Score";
pub const MASKED_LM_ACCURACY: &str = "masked_lm_accuracy";
pub const MASKED_LM_LOSS: &str = "masked_lm_loss";

/// Thresholds swept by [`f1_score`].
pub const F1_THRESHOLDS: usize = 200;

const EPSILON: f32 = 1e-7;

/// `Σ w·v / Σ w`, or zero when all weights are zero.
pub fn weighted_mean(values: &[f32], weights: &[f32]) -> f32 {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f32>() / total
}

/// Weighted fraction of positions where `predictions` equals `labels`.
pub fn accuracy(labels: &[u32], predictions: &[u32], weights: &[f32]) -> f32 {
    let hits: Vec<f32> = labels
        .iter()
        .zip(predictions)
        .map(|(l, p)| if l == p { 1.0 } else { 0.0 })
        .collect();
    weighted_mean(&hits, weights)
}

/// Fraction of sequences whose first `len` positions all match.
///
/// Sequences of length zero carry no weight.
pub fn sequence_accuracy<L, P>(labels: &[L], predictions: &[P], lengths: &[usize]) -> f32
where
    L: AsRef<[u32]>,
    P: AsRef<[u32]>,
{
    let mut hits = Vec::with_capacity(lengths.len());
    let mut weights = Vec::with_capacity(lengths.len());
    for ((gold, pred), &len) in labels.iter().zip(predictions).zip(lengths) {
        let (gold, pred) = (gold.as_ref(), pred.as_ref());
        let len = len.min(gold.len()).min(pred.len());
        hits.push(if gold[..len] == pred[..len] { 1.0 } else { 0.0 });
        weights.push(if len > 0 { 1.0 } else { 0.0 });
    }
    weighted_mean(&hits, &weights)
}

/// Best F1 over [`F1_THRESHOLDS`] thresholds spanning `[0, 1]`.
///
/// `labels` are 0/1 indicators, `predictions` probabilities, both flattened
/// to the same length as `weights`. A prediction counts as positive when it
/// is strictly above the threshold.
pub fn f1_score(labels: &[f32], predictions: &[f32], weights: &[f32]) -> f32 {
    let n = F1_THRESHOLDS;
    let thresholds = std::iter::once(-EPSILON)
        .chain((0..n - 2).map(|i| (i + 1) as f32 / (n - 1) as f32))
        .chain(std::iter::once(1.0 + EPSILON));

    thresholds
        .map(|threshold| {
            let (mut tp, mut fp, mut fn_) = (0f32, 0f32, 0f32);
            for ((&label, &pred), &w) in labels.iter().zip(predictions).zip(weights) {
                let positive = pred > threshold;
                let gold = label > 0.5;
                match (gold, positive) {
                    (true, true) => tp += w,
                    (false, true) => fp += w,
                    (true, false) => fn_ += w,
                    (false, false) => {}
                }
            }
            let precision = tp / (tp + fp + EPSILON);
            let recall = tp / (tp + fn_ + EPSILON);
            2.0 * precision * recall / (precision + recall + EPSILON)
        })
        .fold(0.0, f32::max)
}

/// Row-wise one-hot encoding of `ids` over `num_classes`, flattened.
pub fn one_hot(ids: &[u32], num_classes: usize) -> Vec<f32> {
    let mut out = vec![0.0; ids.len() * num_classes];
    for (row, &id) in ids.iter().enumerate() {
        if (id as usize) < num_classes {
            out[row * num_classes + id as usize] = 1.0;
        }
    }
    out
}

/// Index of the largest value in each row of `num_classes` columns; lowest index on ties.
pub fn argmax_rows(values: &[f32], num_classes: usize) -> Vec<u32> {
    values
        .chunks(num_classes.max(1))
        .map(|row| {
            let mut best = 0;
            for (i, v) in row.iter().enumerate() {
                if *v > row[best] {
                    best = i;
                }
            }
            best as u32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_ignores_zero_weights() {
        let acc = accuracy(&[1, 2, 3, 4], &[1, 2, 0, 0], &[1.0, 1.0, 1.0, 0.0]);
        assert!((acc - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(accuracy(&[1], &[1], &[0.0]), 0.0);
    }

    #[test]
    fn sequence_accuracy_uses_lengths() {
        let gold = [vec![1, 2, 0], vec![1, 1, 1], vec![0, 0, 0]];
        let pred = [vec![1, 2, 5], vec![1, 0, 1], vec![9, 9, 9]];
        // Third sequence has no valid positions.
        let acc = sequence_accuracy(&gold, &pred, &[2, 3, 0]);
        assert!((acc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn f1_of_perfect_predictions_is_one() {
        let labels = one_hot(&[0, 1, 1], 2);
        let f1 = f1_score(&labels, &labels, &[1.0; 6]);
        assert!((f1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn f1_picks_best_threshold() {
        // Positives score 0.6, negatives 0.4: a threshold at 0.5 separates them.
        let labels = [1.0, 0.0, 1.0, 0.0];
        let preds = [0.6, 0.4, 0.6, 0.4];
        assert!((f1_score(&labels, &preds, &[1.0; 4]) - 1.0).abs() < 1e-5);

        let weights = [1.0, 1.0, 0.0, 0.0];
        assert!((f1_score(&labels, &preds, &weights) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn f1_without_positives_is_zero() {
        assert_eq!(f1_score(&[0.0, 0.0], &[0.9, 0.1], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn argmax_prefers_lowest_index() {
        assert_eq!(argmax_rows(&[0.5, 0.5, 0.1, 0.9], 2), vec![0, 1]);
    }

    #[test]
    fn weighted_mean_basic() {
        assert!((weighted_mean(&[2.0, 4.0], &[1.0, 3.0]) - 3.5).abs() < 1e-6);
    }
}
