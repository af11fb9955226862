//! # Linear-Chain CRF
//!
//! Log-likelihood under a transition matrix for training, and Viterbi
//! decoding for inference. Both are restricted to each example's true length,
//! so padding never contributes.

pub mod likelihood;
pub mod viterbi;

pub use likelihood::{log_likelihood, log_sum_exp};
pub use viterbi::ViterbiDecoder;
