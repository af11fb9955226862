//! # Corpus Unification
//!
//! File discovery, train/eval partitioning and concatenation of the three
//! source corpora into one character-level dataset.

use std::fs;
use std::path::PathBuf;

use oorandom::Rand64;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::corpus::boson::BOSON_DOWNLOAD;
use crate::corpus::{
    AnnotationFormat, BracketMarkupParser, CorpusSplit, SegmentTagParser, Sentence, SlashTagParser,
    SuffixTagParser,
};
use crate::error::{Result, ZhnerError};
use crate::types::Mode;

/// Sentences of one document, each a character sequence.
pub type Document = Vec<Vec<char>>;

/// Configuration for corpus discovery and partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Glob matching the Weibo NER column files.
    pub weibo_pattern: String,
    /// Glob matching the BosonNLP markup files.
    pub boson_pattern: String,
    /// Glob matching the MSRA slash-tagged files.
    pub msra_pattern: String,
    /// Share of BosonNLP/MSRA sentences held out for evaluation.
    pub eval_fraction: f64,
    /// Seed of the BosonNLP/MSRA split.
    pub split_seed: u64,
    /// Keep only sentences with at least one non-background label.
    pub entity_only: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            weibo_pattern: "data/ner/weiboNER*".into(),
            boson_pattern: "data/ner/BosonNLP_NER_6C/BosonNLP*".into(),
            msra_pattern: "data/ner/MSRA/train*".into(),
            eval_fraction: 0.2,
            split_seed: 1024,
            entity_only: false,
        }
    }
}

impl CorpusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve all default patterns against `root` instead of the working directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let rebase = |pattern: &str| {
            let relative = pattern.strip_prefix("data/").unwrap_or(pattern);
            root.join(relative).to_string_lossy().into_owned()
        };
        self.weibo_pattern = rebase(&self.weibo_pattern);
        self.boson_pattern = rebase(&self.boson_pattern);
        self.msra_pattern = rebase(&self.msra_pattern);
        self
    }

    /// Set the evaluation share of randomly split corpora.
    pub fn with_eval_fraction(mut self, fraction: f64) -> Self {
        self.eval_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_split_seed(mut self, seed: u64) -> Self {
        self.split_seed = seed;
        self
    }

    /// Enable or disable the entity-only sentence filter.
    pub fn with_entity_only(mut self, enabled: bool) -> Self {
        self.entity_only = enabled;
        self
    }
}

/// Expand a glob pattern into the files it matches, sorted.
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| ZhnerError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(pattern, error = %e, "unreadable glob match"),
        }
    }
    files.sort();
    debug!(pattern, files = files.len(), "discovered corpus files");
    Ok(files)
}

fn read_file(path: &std::path::Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| ZhnerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Deterministic shuffled split: the first `ceil(n * eval_fraction)` shuffled
/// sentences go to eval, the rest to train.
pub fn random_split(sentences: Vec<Sentence>, eval_fraction: f64, seed: u64) -> CorpusSplit {
    let n = sentences.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = Rand64::new(u128::from(seed));
    for i in (1..n).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        order.swap(i, j);
    }

    let n_eval = ((n as f64) * eval_fraction).ceil() as usize;
    let mut slots: Vec<Option<Sentence>> = sentences.into_iter().map(Some).collect();
    let mut take = |idx: usize| slots[idx].take();

    let eval: Vec<Sentence> = order[..n_eval.min(n)].iter().filter_map(|&i| take(i)).collect();
    let train: Vec<Sentence> = order[n_eval.min(n)..].iter().filter_map(|&i| take(i)).collect();
    CorpusSplit { train, eval }
}

/// Reads, partitions and merges the source corpora.
pub struct CorpusUnifier {
    config: CorpusConfig,
    boson: BracketMarkupParser,
    pretrain_split: Regex,
}

impl CorpusUnifier {
    pub fn new(config: CorpusConfig) -> Result<Self> {
        Ok(Self {
            config,
            boson: BracketMarkupParser::new()?,
            pretrain_split: Regex::new(r"[.!?。？！]")?,
        })
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// Drop empty sentences and, if enabled, sentences without entities.
    fn finalize(&self, sentences: Vec<Sentence>, background: &str) -> Vec<Sentence> {
        sentences
            .into_iter()
            .inspect(Sentence::assert_aligned)
            .filter(|s| !s.is_empty())
            .filter(|s| !self.config.entity_only || s.has_entity(background))
            .collect()
    }

    fn parse_files(&self, files: &[PathBuf], format: &dyn AnnotationFormat) -> Result<Vec<Sentence>> {
        let mut sentences = Vec::new();
        for path in files {
            let parsed = format.parse(&read_file(path)?)?;
            debug!(
                format = format.name(),
                path = %path.display(),
                sentences = parsed.len(),
                "parsed corpus file"
            );
            sentences.extend(parsed);
        }
        Ok(self.finalize(sentences, format.background()))
    }

    /// Weibo files partitioned by name: `train`/`dev` files train, others eval.
    pub fn read_weibo(&self, format: &dyn AnnotationFormat) -> Result<CorpusSplit> {
        let files = discover(&self.config.weibo_pattern)?;
        if files.is_empty() {
            warn!(pattern = %self.config.weibo_pattern, "no Weibo NER files found");
        }

        let mut split = CorpusSplit::default();
        for path in files {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let sentences = self.parse_files(std::slice::from_ref(&path), format)?;
            if name.contains("train") || name.contains("dev") {
                split.train.extend(sentences);
            } else {
                split.eval.extend(sentences);
            }
        }

        info!(
            format = format.name(),
            train = split.train.len(),
            eval = split.eval.len(),
            "Weibo corpus ready"
        );
        Ok(split)
    }

    /// Weibo named-entity labels.
    pub fn read_weibo_entities(&self) -> Result<CorpusSplit> {
        self.read_weibo(&SuffixTagParser)
    }

    /// Weibo word-segmentation positions.
    pub fn read_weibo_segments(&self) -> Result<CorpusSplit> {
        self.read_weibo(&SegmentTagParser)
    }

    /// BosonNLP, randomly split. Fails if the corpus has not been downloaded.
    pub fn read_boson(&self) -> Result<CorpusSplit> {
        let files = discover(&self.config.boson_pattern)?;
        if files.is_empty() {
            return Err(ZhnerError::CorpusNotFound {
                pattern: self.config.boson_pattern.clone(),
                download: BOSON_DOWNLOAD,
            });
        }
        let sentences = self.parse_files(&files, &self.boson)?;
        let split = random_split(sentences, self.config.eval_fraction, self.config.split_seed);
        info!(train = split.train.len(), eval = split.eval.len(), "BosonNLP corpus ready");
        Ok(split)
    }

    /// MSRA, randomly split.
    pub fn read_msra(&self) -> Result<CorpusSplit> {
        let files = discover(&self.config.msra_pattern)?;
        if files.is_empty() {
            warn!(pattern = %self.config.msra_pattern, "no MSRA files found");
        }
        let sentences = self.parse_files(&files, &SlashTagParser)?;
        let split = random_split(sentences, self.config.eval_fraction, self.config.split_seed);
        info!(train = split.train.len(), eval = split.eval.len(), "MSRA corpus ready");
        Ok(split)
    }

    /// All three corpora concatenated in the order Weibo, BosonNLP, MSRA.
    pub fn read_joint(&self) -> Result<CorpusSplit> {
        let mut joint = self.read_weibo_entities()?;
        joint.extend(self.read_boson()?);
        joint.extend(self.read_msra()?);
        info!(train = joint.train.len(), eval = joint.eval.len(), "joint NER corpus ready");
        Ok(joint)
    }

    /// Regroup sentences into documents of punctuation-delimited sentences.
    pub fn regroup_documents(&self, sentences: &[Sentence]) -> Vec<Document> {
        sentences
            .iter()
            .map(|s| {
                self.pretrain_split
                    .split(&s.text())
                    .filter(|part| !part.is_empty())
                    .map(|part| part.chars().collect())
                    .collect::<Document>()
            })
            .filter(|doc| !doc.is_empty())
            .collect()
    }

    /// Document-grouped sentences for sentence-pair pretraining.
    pub fn read_pretraining_documents(&self, mode: Mode) -> Result<Vec<Document>> {
        let split = self.read_weibo_segments()?;
        let documents = self.regroup_documents(split.partition(mode));
        info!(%mode, documents = documents.len(), "pretraining documents ready");
        Ok(documents)
    }
}
