//! # zhner Trainer
//!
//! Drives the heads of `zhner-core` over a candle BERT encoder: command-line
//! configuration, the encoder adapter, batching helpers and the multi-task
//! training loop with evaluation, prediction and checkpointing.

pub mod config;
pub mod data;
pub mod encoder;
pub mod trainer;

pub use config::{CorpusArgs, PrepareConfig, TrainConfig};
pub use data::{PartitionStats, PredictionRecord, PreparedRecord, read_jsonl, write_jsonl};
pub use encoder::{BertEncoder, EncoderConfig, EncoderDims};
pub use trainer::{Head, HeadPrediction, TaskSlot, Trainer, init_tracing};
