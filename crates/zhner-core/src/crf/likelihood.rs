use candle_core::{DType, Tensor};

use crate::error::{Result, ZhnerError};

/// `log Σ exp(x)` along `dim`, which is removed from the result.
pub fn log_sum_exp(x: &Tensor, dim: usize) -> Result<Tensor> {
    let max = x.max_keepdim(dim)?;
    let summed = x.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok((summed + max)?.squeeze(dim)?)
}

/// Per-example CRF log-likelihood of the gold tags.
///
/// * `emissions` - `[batch, seq_len, num_tags]` unary scores
/// * `tags` - `[batch, seq_len]` gold tag ids
/// * `lengths` - valid length of each example; positions at or past it are ignored
/// * `transitions` - `[num_tags, num_tags]`, entry `(i, j)` scores tag `i` followed by `j`
///
/// Returns a `[batch]` tensor. An example of length zero scores zero.
pub fn log_likelihood(
    emissions: &Tensor,
    tags: &Tensor,
    lengths: &[usize],
    transitions: &Tensor,
) -> Result<Tensor> {
    let (batch, seq_len, num_tags) = emissions.dims3()?;
    if transitions.dims() != [num_tags, num_tags] {
        return Err(ZhnerError::Shape(format!(
            "transition matrix {:?} does not match {num_tags} tags",
            transitions.dims()
        )));
    }
    if lengths.len() != batch || tags.dims() != [batch, seq_len] {
        return Err(ZhnerError::Shape(format!(
            "tags {:?} and {} lengths do not match emissions {:?}",
            tags.dims(),
            lengths.len(),
            emissions.dims()
        )));
    }

    let device = emissions.device();
    let dtype = emissions.dtype();
    let gold: Vec<Vec<u32>> = tags.to_dtype(DType::U32)?.to_vec2()?;
    let flat_transitions = transitions.flatten_all()?;

    let mut scores = Vec::with_capacity(batch);
    for (b, &len) in lengths.iter().enumerate() {
        let len = len.min(seq_len);
        if len == 0 {
            scores.push(Tensor::zeros((), dtype, device)?);
            continue;
        }

        let em = emissions.get(b)?.narrow(0, 0, len)?;
        let path = &gold[b][..len];

        // Score of the gold path.
        let path_ids = Tensor::new(path, device)?.unsqueeze(1)?;
        let mut gold_score = em.gather(&path_ids, 1)?.sum_all()?;
        if len > 1 {
            let pairs: Vec<u32> = path
                .windows(2)
                .map(|w| w[0] * num_tags as u32 + w[1])
                .collect();
            let pair_ids = Tensor::new(pairs.as_slice(), device)?;
            gold_score = (gold_score + flat_transitions.index_select(&pair_ids, 0)?.sum_all()?)?;
        }

        // Forward algorithm for the partition function.
        let mut alpha = em.get(0)?;
        for t in 1..len {
            let step = alpha.unsqueeze(1)?.broadcast_add(transitions)?;
            alpha = (log_sum_exp(&step, 0)? + em.get(t)?)?;
        }
        let log_partition = log_sum_exp(&alpha, 0)?;

        scores.push((gold_score - log_partition)?);
    }

    Ok(Tensor::stack(&scores, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Enumerate every tag path to compute log Z exactly.
    fn brute_force(em: &[Vec<f32>], trans: &[Vec<f32>], gold: &[u32]) -> f32 {
        let k = trans.len();
        let len = em.len();
        let score = |path: &[usize]| -> f32 {
            let mut s = em[0][path[0]];
            for t in 1..len {
                s += trans[path[t - 1]][path[t]] + em[t][path[t]];
            }
            s
        };

        let mut total = 0f64;
        let mut path = vec![0usize; len];
        loop {
            total += f64::from(score(&path)).exp();
            let mut pos = 0;
            while pos < len {
                path[pos] += 1;
                if path[pos] < k {
                    break;
                }
                path[pos] = 0;
                pos += 1;
            }
            if pos == len {
                break;
            }
        }

        let gold: Vec<usize> = gold.iter().map(|&g| g as usize).collect();
        score(&gold) - total.ln() as f32
    }

    fn fixture() -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let em = vec![
            vec![0.5, -0.2, 1.0],
            vec![0.1, 0.7, -0.3],
            vec![-1.0, 0.4, 0.2],
        ];
        let trans = vec![
            vec![0.3, -0.5, 0.1],
            vec![0.2, 0.6, -0.4],
            vec![-0.1, 0.0, 0.5],
        ];
        (em, trans)
    }

    fn to_tensor(rows: &[Vec<f32>]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), rows[0].len()), &Device::Cpu).unwrap()
    }

    #[test]
    fn matches_brute_force_enumeration() {
        let (em, trans) = fixture();
        let gold = [2u32, 1, 1];

        let emissions = to_tensor(&em).unsqueeze(0).unwrap();
        let tags = Tensor::new(&[gold], &Device::Cpu).unwrap();
        let ll = log_likelihood(&emissions, &tags, &[3], &to_tensor(&trans)).unwrap();

        let got = ll.to_vec1::<f32>().unwrap()[0];
        let want = brute_force(&em, &trans, &gold);
        assert!((got - want).abs() < 1e-4, "{got} vs {want}");
        assert!(got < 0.0);
    }

    #[test]
    fn padding_does_not_change_likelihood() {
        let (em, trans) = fixture();
        let transitions = to_tensor(&trans);

        let short = to_tensor(&em[..2]).unsqueeze(0).unwrap();
        let short_tags = Tensor::new(&[[0u32, 1]], &Device::Cpu).unwrap();
        let a = log_likelihood(&short, &short_tags, &[2], &transitions).unwrap();

        // Same first two positions, garbage afterwards.
        let mut padded_em = em[..2].to_vec();
        padded_em.push(vec![50.0, -50.0, 9.0]);
        padded_em.push(vec![3.0, 3.0, 3.0]);
        let padded = to_tensor(&padded_em).unsqueeze(0).unwrap();
        let padded_tags = Tensor::new(&[[0u32, 1, 2, 2]], &Device::Cpu).unwrap();
        let b = log_likelihood(&padded, &padded_tags, &[2], &transitions).unwrap();

        let (a, b) = (a.to_vec1::<f32>().unwrap()[0], b.to_vec1::<f32>().unwrap()[0]);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn empty_example_scores_zero() {
        let (em, trans) = fixture();
        let emissions = Tensor::stack(&[to_tensor(&em), to_tensor(&em)], 0).unwrap();
        let tags = Tensor::zeros((2, 3), DType::U32, &Device::Cpu).unwrap();
        let ll = log_likelihood(&emissions, &tags, &[0, 1], &to_tensor(&trans)).unwrap();
        let values = ll.to_vec1::<f32>().unwrap();
        assert_eq!(values[0], 0.0);
        assert!(values[1] < 0.0);
    }

    #[test]
    fn rejects_mismatched_transitions() {
        let (em, _) = fixture();
        let emissions = to_tensor(&em).unsqueeze(0).unwrap();
        let tags = Tensor::zeros((1, 3), DType::U32, &Device::Cpu).unwrap();
        let bad = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            log_likelihood(&emissions, &tags, &[3], &bad),
            Err(ZhnerError::Shape(_))
        ));
    }

    #[test]
    fn log_sum_exp_is_stable() {
        let x = Tensor::new(&[1000f32, 1000.0], &Device::Cpu).unwrap();
        let v = log_sum_exp(&x, 0).unwrap().to_scalar::<f32>().unwrap();
        assert!((v - (1000.0 + 2f32.ln())).abs() < 1e-3);
    }
}
