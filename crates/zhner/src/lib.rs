//! # zhner
//!
//! Unified Chinese named-entity corpora (Weibo, BosonNLP, MSRA), label
//! encoders and multi-task BERT heads, with a candle training loop.
//!
//! This crate re-exports [`zhner_core`] at its root and the trainer under
//! [`trainer`].

pub use zhner_core::*;

pub use zhner_trainer as trainer;
