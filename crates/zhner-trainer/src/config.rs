//! Command-line configuration of the trainer binaries.

use std::path::PathBuf;

use clap::{Args, Parser};
use zhner_core::corpus::CorpusConfig;
use zhner_core::tasks::Task;
use zhner_core::types::Mode;

/// Corpus location and partitioning, shared by both binaries.
#[derive(Debug, Clone, Args)]
pub struct CorpusArgs {
    /// Directory holding `ner/weiboNER*`, `ner/BosonNLP_NER_6C/` and `ner/MSRA/`
    #[arg(long, env = "ZHNER_DATA_ROOT", default_value = "data")]
    pub data_root: PathBuf,

    /// Share of BosonNLP/MSRA sentences held out for evaluation
    #[arg(long, env = "ZHNER_EVAL_FRACTION", default_value_t = 0.2)]
    pub eval_fraction: f64,

    /// Seed of the BosonNLP/MSRA split
    #[arg(long, env = "ZHNER_SPLIT_SEED", default_value_t = 1024)]
    pub split_seed: u64,

    /// Keep only sentences containing at least one entity
    #[arg(long, env = "ZHNER_ENTITY_ONLY")]
    pub entity_only: bool,
}

impl CorpusArgs {
    pub fn corpus_config(&self) -> CorpusConfig {
        CorpusConfig::new()
            .with_root(&self.data_root)
            .with_eval_fraction(self.eval_fraction)
            .with_split_seed(self.split_seed)
            .with_entity_only(self.entity_only)
    }
}

/// Train, evaluate or run a BERT encoder with task heads.
#[derive(Debug, Clone, Parser)]
#[command(name = "train")]
#[command(about = "Multi-task training over the unified Chinese NER corpora")]
#[command(version)]
pub struct TrainConfig {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Pipeline mode: train, eval or predict
    #[arg(short, long, env = "ZHNER_MODE", default_value = "train")]
    pub mode: Mode,

    /// Tasks trained jointly, comma separated (WeiboPretrain must run alone)
    #[arg(short, long, env = "ZHNER_TASKS", value_delimiter = ',', default_value = "NER")]
    pub tasks: Vec<Task>,

    /// Directory with the encoder's config.json, vocab.txt or tokenizer.json,
    /// and optionally model.safetensors
    #[arg(long, env = "ZHNER_MODEL_DIR", default_value = "models/bert-base-chinese")]
    pub model_dir: PathBuf,

    /// Where checkpoints, label encoders and predictions are written
    #[arg(short, long, env = "ZHNER_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Label encoder directory (defaults to `<output-dir>/labels`)
    #[arg(long, env = "ZHNER_LABEL_DIR")]
    pub label_dir: Option<PathBuf>,

    /// JSON file overriding head hyperparameters
    #[arg(long, env = "ZHNER_HEAD_CONFIG")]
    pub head_config: Option<PathBuf>,

    #[arg(short, long, env = "ZHNER_EPOCHS", default_value_t = 3)]
    pub epochs: usize,

    #[arg(short, long, env = "ZHNER_BATCH_SIZE", default_value_t = 32)]
    pub batch_size: usize,

    /// Maximum tokens per sequence, including [CLS] and [SEP]
    #[arg(long, env = "ZHNER_MAX_SEQ_LEN", default_value_t = 128)]
    pub max_seq_len: usize,

    #[arg(long, env = "ZHNER_LEARNING_RATE", default_value_t = 5e-5)]
    pub learning_rate: f64,

    /// Seed of batch shuffling and pretraining masks
    #[arg(long, env = "ZHNER_SEED", default_value_t = 1024)]
    pub seed: u64,

    /// Log the running loss every N steps
    #[arg(long, env = "ZHNER_LOG_EVERY", default_value_t = 100)]
    pub log_every: usize,

    /// Run on the first CUDA device when available
    #[arg(long, env = "ZHNER_GPU")]
    pub gpu: bool,
}

impl TrainConfig {
    pub fn label_dir(&self) -> PathBuf {
        self.label_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("labels"))
    }

    pub fn encoder_checkpoint(&self) -> PathBuf {
        self.output_dir.join("encoder.safetensors")
    }

    pub fn heads_checkpoint(&self) -> PathBuf {
        self.output_dir.join("heads.safetensors")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.output_dir.join("predictions.jsonl")
    }
}

/// Export the unified corpora as JSON lines.
#[derive(Debug, Clone, Parser)]
#[command(name = "prepare")]
#[command(about = "Write the unified corpora as JSONL with per-partition statistics")]
#[command(version)]
pub struct PrepareConfig {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Tasks to export, comma separated
    #[arg(
        short,
        long,
        env = "ZHNER_TASKS",
        value_delimiter = ',',
        default_value = "NER,WeiboSegment,WeiboPretrain"
    )]
    pub tasks: Vec<Task>,

    /// Output directory for `<task>.<partition>.jsonl` and label encoders
    #[arg(short, long, env = "ZHNER_OUTPUT_DIR", default_value = "output/prepared")]
    pub output_dir: PathBuf,
}
