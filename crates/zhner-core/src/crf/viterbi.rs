//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring tag sequence given emission scores and the
//! transition matrix, optionally forbidding ill-formed BIO transitions.

use candle_core::{DType, Tensor};

use crate::error::{Result, ZhnerError};
use crate::labels::{BioTag, LabelEncoder};

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
    /// `allowed[prev][curr]`; `None` allows every transition.
    allowed: Option<Vec<Vec<bool>>>,
}

impl ViterbiDecoder {
    /// Create an unconstrained decoder over `num_tags` tags.
    pub fn new(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: None,
        }
    }

    /// Decoder that forbids `I-X` after anything but `B-X`/`I-X`.
    ///
    /// Labels that are not BIO tags (segmentation positions, classes) stay
    /// unconstrained.
    pub fn with_bio_constraints(encoder: &LabelEncoder) -> Self {
        let tags: Vec<Option<BioTag>> = encoder.labels().iter().map(|l| l.parse().ok()).collect();
        let allowed = tags
            .iter()
            .map(|prev| {
                tags.iter()
                    .map(|curr| match (prev, curr) {
                        (Some(prev), Some(curr)) => BioTag::is_valid_transition(*prev, *curr),
                        _ => true,
                    })
                    .collect()
            })
            .collect();
        Self {
            num_tags: tags.len(),
            allowed: Some(allowed),
        }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    fn is_allowed(&self, prev: usize, curr: usize) -> bool {
        self.allowed.as_ref().is_none_or(|a| a[prev][curr])
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - `[seq_len][num_tags]` emission scores
    /// * `transition_matrix` - `[num_tags][num_tags]` transition scores
    ///
    /// Ties resolve to the lowest tag index, so decoding is deterministic.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(ZhnerError::Shape(format!(
                "emission score dimension mismatch: expected {}, got {}",
                self.num_tags,
                row.len()
            )));
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
        {
            return Err(ZhnerError::Shape(format!(
                "transition matrix must be {0}x{0}",
                self.num_tags
            )));
        }

        let mut score = emission_scores[0].clone();
        let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(seq_len - 1);

        for emissions in &emission_scores[1..] {
            let mut next = vec![f32::NEG_INFINITY; self.num_tags];
            let mut pointers = vec![0usize; self.num_tags];

            for curr in 0..self.num_tags {
                for prev in 0..self.num_tags {
                    if !self.is_allowed(prev, curr) {
                        continue;
                    }
                    let candidate = score[prev] + transition_matrix[prev][curr] + emissions[curr];
                    if candidate > next[curr] {
                        next[curr] = candidate;
                        pointers[curr] = prev;
                    }
                }
            }

            score = next;
            backptr.push(pointers);
        }

        // Best final tag, lowest index on ties.
        let mut best = 0;
        for tag in 1..self.num_tags {
            if score[tag] > score[best] {
                best = tag;
            }
        }

        let mut path = Vec::with_capacity(seq_len);
        path.push(best);
        for pointers in backptr.iter().rev() {
            best = pointers[best];
            path.push(best);
        }
        path.reverse();
        Ok(path)
    }

    /// Decode a padded batch, each example restricted to its own length.
    ///
    /// * `emissions` - `[batch, seq_len, num_tags]`
    /// * `transitions` - `[num_tags, num_tags]`
    pub fn decode_batch(
        &self,
        emissions: &Tensor,
        transitions: &Tensor,
        lengths: &[usize],
    ) -> Result<Vec<Vec<u32>>> {
        let emissions: Vec<Vec<Vec<f32>>> = emissions.to_dtype(DType::F32)?.to_vec3()?;
        let transitions: Vec<Vec<f32>> = transitions.to_dtype(DType::F32)?.to_vec2()?;
        if emissions.len() != lengths.len() {
            return Err(ZhnerError::Shape(format!(
                "{} lengths for a batch of {}",
                lengths.len(),
                emissions.len()
            )));
        }

        emissions
            .iter()
            .zip(lengths)
            .map(|(example, &len)| {
                let len = len.min(example.len());
                let path = self.decode(&example[..len], &transitions)?;
                Ok(path.into_iter().map(|tag| tag as u32).collect())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelSource, NER_ALPHABET};
    use candle_core::Device;

    fn brute_force(emissions: &[Vec<f32>], transitions: &[Vec<f32>]) -> f32 {
        let k = transitions.len();
        let n = emissions.len();
        let mut best = f32::NEG_INFINITY;
        for code in 0..k.pow(n as u32) {
            let path: Vec<usize> = (0..n).map(|i| (code / k.pow(i as u32)) % k).collect();
            let mut s = emissions[0][path[0]];
            for t in 1..n {
                s += transitions[path[t - 1]][path[t]] + emissions[t][path[t]];
            }
            best = best.max(s);
        }
        best
    }

    fn path_score(path: &[usize], emissions: &[Vec<f32>], transitions: &[Vec<f32>]) -> f32 {
        let mut s = emissions[0][path[0]];
        for t in 1..path.len() {
            s += transitions[path[t - 1]][path[t]] + emissions[t][path[t]];
        }
        s
    }

    #[test]
    fn test_viterbi_matches_exhaustive_search() {
        let emissions = vec![
            vec![0.2, 1.0, -0.5],
            vec![0.9, -0.1, 0.3],
            vec![-0.4, 0.6, 0.8],
            vec![0.1, 0.1, 0.0],
        ];
        let transitions = vec![
            vec![0.5, -1.0, 0.2],
            vec![0.0, 0.3, -0.2],
            vec![-0.3, 0.4, 0.1],
        ];
        let path = ViterbiDecoder::new(3).decode(&emissions, &transitions).unwrap();
        let got = path_score(&path, &emissions, &transitions);
        assert!((got - brute_force(&emissions, &transitions)).abs() < 1e-6);
    }

    #[test]
    fn test_viterbi_empty() {
        let path = ViterbiDecoder::new(2).decode(&[], &[vec![0.0; 2], vec![0.0; 2]]).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn test_viterbi_is_deterministic_on_ties() {
        let emissions = vec![vec![1.0; 4]; 5];
        let transitions = vec![vec![0.0; 4]; 4];
        let decoder = ViterbiDecoder::new(4);
        let first = decoder.decode(&emissions, &transitions).unwrap();
        assert_eq!(first, vec![0; 5]);
        for _ in 0..10 {
            assert_eq!(decoder.decode(&emissions, &transitions).unwrap(), first);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = ViterbiDecoder::new(3)
            .decode(&[vec![0.0; 2]], &vec![vec![0.0; 3]; 3])
            .unwrap_err();
        assert!(matches!(err, ZhnerError::Shape(_)));
    }

    #[test]
    fn test_bio_constraints_forbid_orphan_inside() {
        let encoder = LabelEncoder::build("NER", &LabelSource::fixed(NER_ALPHABET), "O");
        let decoder = ViterbiDecoder::with_bio_constraints(&encoder);
        let i_per = encoder.encode("I-PER").unwrap() as usize;
        let b_per = encoder.encode("B-PER").unwrap() as usize;

        // I-PER dominates everywhere, but it cannot open a span after O.
        let mut emissions = vec![vec![0.0; 9]; 2];
        emissions[0][0] = 1.0;
        emissions[1][i_per] = 5.0;
        emissions[1][b_per] = 1.0;
        let transitions = vec![vec![0.0; 9]; 9];

        let unconstrained = ViterbiDecoder::new(9).decode(&emissions, &transitions).unwrap();
        assert_eq!(unconstrained, vec![0, i_per]);

        let path = decoder.decode(&emissions, &transitions).unwrap();
        let labels = encoder
            .decode_all(&path.iter().map(|&t| t as u32).collect::<Vec<_>>())
            .unwrap();
        assert_ne!(labels, ["O", "I-PER"]);
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_segment_labels_stay_unconstrained() {
        let encoder = LabelEncoder::build("WeiboSegment", &LabelSource::observed(["0", "1", "2"]), "0");
        let decoder = ViterbiDecoder::with_bio_constraints(&encoder);
        assert_eq!(decoder.num_tags(), 3);
        for prev in 0..3 {
            for curr in 0..3 {
                assert!(decoder.is_allowed(prev, curr));
            }
        }
    }

    #[test]
    fn test_decode_batch_respects_lengths() {
        let emissions = Tensor::new(
            &[
                [[0.0f32, 1.0], [1.0, 0.0], [0.0, 9.0]],
                [[2.0, 0.0], [0.0, 0.0], [0.0, 0.0]],
            ],
            &Device::Cpu,
        )
        .unwrap();
        let transitions = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let paths = ViterbiDecoder::new(2)
            .decode_batch(&emissions, &transitions, &[2, 1])
            .unwrap();
        assert_eq!(paths, vec![vec![1, 0], vec![0]]);
    }
}
