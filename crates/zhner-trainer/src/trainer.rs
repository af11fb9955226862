//! Multi-task training loop over a shared BERT encoder.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use oorandom::Rand64;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use zhner_core::corpus::{CorpusUnifier, Document};
use zhner_core::features::{CharVocab, FeatureBuilder, Features, PretrainingConfig, TaskSpec};
use zhner_core::heads::{
    ClassificationHead, Encoder, EvalOutput, HeadConfig, HiddenBundle, PretrainHead,
    SequenceTagHead, TaskHead,
};
use zhner_core::labels::{LabelEncoder, LabelRegistry};
use zhner_core::tasks::{Example, HeadKind, Task, TaskData};
use zhner_core::types::Mode;

use crate::config::TrainConfig;
use crate::data::{PredictionRecord, collect_examples, shuffle, write_jsonl};
use crate::encoder::{BertEncoder, EncoderConfig};

/// Metric name under which each task's mean evaluation loss is reported.
pub const LOSS: &str = "loss";

/// Install a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Head of one task, selected by its [`HeadKind`].
pub enum Head {
    Tagging(SequenceTagHead),
    Classification(ClassificationHead),
    Pretraining(PretrainHead),
}

/// Output of [`Head::predict`].
pub enum HeadPrediction {
    /// Decoded tag ids per example, `[CLS]` and `[SEP]` included.
    Tags(Vec<Vec<u32>>),
    /// Most probable class id per example.
    Classes(Vec<u32>),
}

impl Head {
    pub fn build(
        task: Task,
        encoder: Option<&LabelEncoder>,
        config: &HeadConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let labelled = || {
            encoder.with_context(|| format!("task {task} has no label encoder"))
        };
        let head = match task.head_kind() {
            HeadKind::SequenceTag => {
                Head::Tagging(SequenceTagHead::for_encoder(labelled()?, config, vb)?)
            }
            HeadKind::Classification => {
                let classes = config.num_classes_for(task.name(), labelled()?.len());
                Head::Classification(ClassificationHead::new(task.name(), classes, config, vb)?)
            }
            HeadKind::Pretraining => Head::Pretraining(PretrainHead::new(config, vb)?),
        };
        Ok(head)
    }

    pub fn train_loss(&self, hidden: &HiddenBundle, features: &Features) -> Result<Tensor> {
        let loss = match self {
            Head::Tagging(head) => head.compute_train_loss(hidden, features)?,
            Head::Classification(head) => head.compute_train_loss(hidden, features)?,
            Head::Pretraining(head) => head.compute_train_loss(hidden, features)?,
        };
        Ok(loss)
    }

    pub fn eval(&self, hidden: &HiddenBundle, features: &Features) -> Result<EvalOutput> {
        let output = match self {
            Head::Tagging(head) => head.compute_eval(hidden, features)?,
            Head::Classification(head) => head.compute_eval(hidden, features)?,
            Head::Pretraining(head) => head.compute_eval(hidden, features)?,
        };
        Ok(output)
    }

    pub fn predict(&self, hidden: &HiddenBundle, features: &Features) -> Result<HeadPrediction> {
        let prediction = match self {
            Head::Tagging(head) => HeadPrediction::Tags(head.predict(hidden, features)?),
            Head::Classification(head) => {
                let probs = head.predict(hidden, features)?;
                HeadPrediction::Classes(probs.argmax(1)?.to_vec1::<u32>()?)
            }
            Head::Pretraining(_) => bail!("pretraining heads have no label predictions"),
        };
        Ok(prediction)
    }
}

/// A task with its head and the data of the partitions in use.
pub struct TaskSlot {
    pub task: Task,
    pub head: Head,
    /// Absent for pretraining.
    pub spec: Option<TaskSpec>,
    /// Loaded in train mode only.
    pub train: Option<TaskData>,
    pub eval: TaskData,
}

impl TaskSlot {
    fn encoder(&self) -> Option<&Arc<LabelEncoder>> {
        self.eval.encoder.as_ref()
    }
}

/// Running sums of per-batch metrics, weighted by batch size.
#[derive(Default)]
struct MetricTotals {
    sums: BTreeMap<String, f64>,
    weight: f64,
}

impl MetricTotals {
    fn add(&mut self, output: &EvalOutput, batch_size: usize) -> Result<()> {
        let w = batch_size as f64;
        let loss = output.loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        for (name, value) in &output.metrics {
            *self.sums.entry(name.clone()).or_default() += f64::from(*value) * w;
        }
        *self.sums.entry(LOSS.to_string()).or_default() += f64::from(loss) * w;
        self.weight += w;
        Ok(())
    }

    fn means(self) -> BTreeMap<String, f32> {
        let weight = self.weight.max(f64::EPSILON);
        self.sums
            .into_iter()
            .map(|(name, sum)| (name, (sum / weight) as f32))
            .collect()
    }
}

/// Shared encoder, task heads and optimizer state of one run.
pub struct Trainer {
    config: TrainConfig,
    device: Device,
    builder: FeatureBuilder,
    encoder: BertEncoder,
    encoder_vars: VarMap,
    head_vars: VarMap,
    slots: Vec<TaskSlot>,
    pretraining: PretrainingConfig,
    rng: Rand64,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        if config.tasks.is_empty() {
            bail!("no task selected");
        }
        if config.tasks.len() > 1 && config.tasks.contains(&Task::WeiboPretrain) {
            bail!("{} cannot be combined with other tasks", Task::WeiboPretrain);
        }

        let device = if config.gpu {
            Device::cuda_if_available(0)?
        } else {
            Device::Cpu
        };
        info!(device = ?device, mode = %config.mode, "initializing trainer");

        let vocab = Arc::new(load_vocab(&config.model_dir)?);
        let encoder_config = EncoderConfig::from_file(&config.model_dir.join("config.json"))?;

        let mut encoder_vars = VarMap::new();
        let vb = VarBuilder::from_varmap(&encoder_vars, DType::F32, &device);
        let encoder = BertEncoder::load(&encoder_config, vb.pp("bert"))?;
        load_encoder_weights(&config, &mut encoder_vars)?;

        let head_config = match &config.head_config {
            Some(path) => HeadConfig::from_file(path)?,
            None => HeadConfig::default(),
        }
        .with_hidden_size(encoder_config.dims.hidden_size)
        .with_vocab_size(encoder_config.dims.vocab_size);

        let unifier = CorpusUnifier::new(config.corpus.corpus_config())?;
        let registry = LabelRegistry::with_dir(config.label_dir());

        let mut head_vars = VarMap::new();
        let heads_vb = VarBuilder::from_varmap(&head_vars, DType::F32, &device);
        let mut slots = Vec::with_capacity(config.tasks.len());
        for &task in &config.tasks {
            let train = match config.mode {
                Mode::Train => Some(task.load(&unifier, &registry, Mode::Train)?),
                Mode::Eval | Mode::Predict => None,
            };
            let eval_mode = match config.mode {
                Mode::Predict => Mode::Predict,
                Mode::Train | Mode::Eval => Mode::Eval,
            };
            let eval = task.load(&unifier, &registry, eval_mode)?;
            let head = Head::build(
                task,
                eval.encoder.as_deref(),
                &head_config,
                heads_vb.pp(task.name()),
            )?;
            let spec = eval
                .encoder
                .clone()
                .filter(|_| task.head_kind() != HeadKind::Pretraining)
                .map(|encoder| TaskSpec::new(task.name(), task.head_kind(), encoder));
            slots.push(TaskSlot {
                task,
                head,
                spec,
                train,
                eval,
            });
        }

        let heads_checkpoint = config.heads_checkpoint();
        if config.mode != Mode::Train {
            head_vars.load(&heads_checkpoint).with_context(|| {
                format!("failed to load head weights {}", heads_checkpoint.display())
            })?;
            info!(path = %heads_checkpoint.display(), "head weights loaded");
        }

        let builder = FeatureBuilder::new(vocab, config.max_seq_len, device.clone());
        let rng = Rand64::new(u128::from(config.seed));
        Ok(Self {
            config,
            device,
            builder,
            encoder,
            encoder_vars,
            head_vars,
            slots,
            pretraining: PretrainingConfig::default(),
            rng,
        })
    }

    pub fn slots(&self) -> &[TaskSlot] {
        &self.slots
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn specs(&self) -> Vec<TaskSpec> {
        self.slots.iter().filter_map(|s| s.spec.clone()).collect()
    }

    fn is_pretraining(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.task.head_kind() == HeadKind::Pretraining)
    }

    /// Run every epoch, evaluating and saving after each one.
    pub fn train(&mut self) -> Result<()> {
        let vars = [self.encoder_vars.all_vars(), self.head_vars.all_vars()].concat();
        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(vars, params)?;

        for epoch in 1..=self.config.epochs {
            let mean_loss = if self.is_pretraining() {
                self.pretraining_epoch(&mut optimizer, epoch)?
            } else {
                self.supervised_epoch(&mut optimizer, epoch)?
            };
            info!(epoch, epochs = self.config.epochs, mean_loss, "epoch complete");
            self.save()?;

            for (task, metrics) in self.evaluate()? {
                info!(epoch, task = %task, metrics = ?metrics, "evaluation");
            }
        }
        Ok(())
    }

    fn step(&self, optimizer: &mut AdamW, features: &Features) -> Result<f32> {
        let hidden = self.encoder.encode(features, Mode::Train)?;
        let losses = self
            .slots
            .iter()
            .map(|slot| slot.head.train_loss(&hidden, features))
            .collect::<Result<Vec<_>>>()?;
        let loss = Tensor::stack(&losses, 0)?.sum_all()?;
        optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    fn log_progress(&self, epoch: usize, step: usize, steps: usize, running: f32) {
        if self.config.log_every > 0 && step % self.config.log_every == 0 {
            info!(epoch, step, steps, loss = running / step as f32, "training");
        }
    }

    fn supervised_epoch(&mut self, optimizer: &mut AdamW, epoch: usize) -> Result<f32> {
        let mut examples: Vec<Example> =
            collect_examples(self.slots.iter().filter_map(|s| s.train.as_ref()));
        if examples.is_empty() {
            warn!(epoch, "no training examples");
            return Ok(0.0);
        }
        shuffle(&mut examples, &mut self.rng);

        let specs = self.specs();
        let batch_size = self.config.batch_size.max(1);
        let steps = examples.len().div_ceil(batch_size);
        let mut running = 0.0;
        for (i, chunk) in examples.chunks(batch_size).enumerate() {
            let features = self.builder.batch(chunk, &specs)?;
            running += self.step(optimizer, &features)?;
            self.log_progress(epoch, i + 1, steps, running);
        }
        Ok(running / steps as f32)
    }

    fn pretraining_epoch(&mut self, optimizer: &mut AdamW, epoch: usize) -> Result<f32> {
        let mut documents: Vec<Document> = self
            .slots
            .iter()
            .filter_map(|s| s.train.as_ref())
            .flat_map(|data| data.documents().iter().cloned())
            .collect();
        if documents.is_empty() {
            warn!(epoch, "no pretraining documents");
            return Ok(0.0);
        }
        shuffle(&mut documents, &mut self.rng);

        let batch_size = self.config.batch_size.max(1);
        let steps = documents.len().div_ceil(batch_size);
        let mut running = 0.0;
        for (i, chunk) in documents.chunks(batch_size).enumerate() {
            let features =
                self.builder
                    .pretraining_batch(chunk, &documents, &self.pretraining, &mut self.rng)?;
            running += self.step(optimizer, &features)?;
            self.log_progress(epoch, i + 1, steps, running);
        }
        Ok(running / steps as f32)
    }

    /// Mean metrics and loss per task over its held-out partition.
    ///
    /// Pretraining masks are drawn from a generator reseeded on every call,
    /// so repeated evaluations see the same batches.
    pub fn evaluate(&self) -> Result<BTreeMap<Task, BTreeMap<String, f32>>> {
        let batch_size = self.config.batch_size.max(1);
        let mut results = BTreeMap::new();

        for slot in &self.slots {
            let mut totals = MetricTotals::default();
            match &slot.spec {
                Some(spec) => {
                    let specs = std::slice::from_ref(spec);
                    for chunk in slot.eval.examples().chunks(batch_size) {
                        let features = self.builder.batch(chunk, specs)?;
                        let hidden = self.encoder.encode(&features, Mode::Eval)?;
                        totals.add(&slot.head.eval(&hidden, &features)?, chunk.len())?;
                    }
                }
                None => {
                    let documents = slot.eval.documents();
                    let mut rng = Rand64::new(u128::from(self.config.seed));
                    for chunk in documents.chunks(batch_size) {
                        let features = self.builder.pretraining_batch(
                            chunk,
                            documents,
                            &self.pretraining,
                            &mut rng,
                        )?;
                        let hidden = self.encoder.encode(&features, Mode::Eval)?;
                        totals.add(&slot.head.eval(&hidden, &features)?, chunk.len())?;
                    }
                }
            }
            if totals.weight == 0.0 {
                warn!(task = %slot.task, "nothing to evaluate");
                continue;
            }
            results.insert(slot.task, totals.means());
        }
        Ok(results)
    }

    /// Decode the held-out partition of every labelled task to `path` as JSON lines.
    pub fn predict(&self, path: &Path) -> Result<usize> {
        let batch_size = self.config.batch_size.max(1);
        let mut records = Vec::new();

        for slot in &self.slots {
            let (Some(spec), Some(encoder)) = (&slot.spec, slot.encoder()) else {
                warn!(task = %slot.task, "prediction is not supported for this task");
                continue;
            };
            let specs = std::slice::from_ref(spec);
            for chunk in slot.eval.examples().chunks(batch_size) {
                let features = self.builder.batch(chunk, specs)?;
                let hidden = self.encoder.encode(&features, Mode::Predict)?;
                match slot.head.predict(&hidden, &features)? {
                    HeadPrediction::Tags(paths) => {
                        for (example, tags) in chunk.iter().zip(&paths) {
                            // Drop the [CLS] and [SEP] positions.
                            let inner = tags.get(1..tags.len().saturating_sub(1)).unwrap_or(&[]);
                            let labels = encoder.decode_all(inner)?;
                            let chars = &example.chars[..labels.len().min(example.chars.len())];
                            records.push(PredictionRecord::new(slot.task.name(), chars, labels));
                        }
                    }
                    HeadPrediction::Classes(classes) => {
                        for (example, &class) in chunk.iter().zip(&classes) {
                            let label = encoder.decode(class)?.to_string();
                            records.push(PredictionRecord {
                                task: slot.task.name().to_string(),
                                text: example.chars.iter().collect(),
                                labels: vec![label],
                                entities: Vec::new(),
                            });
                        }
                    }
                }
            }
            debug!(task = %slot.task, records = records.len(), "predictions decoded");
        }

        let written = write_jsonl(path, &records)?;
        info!(path = %path.display(), records = written, "predictions written");
        Ok(written)
    }

    /// Write encoder and head weights to the output directory.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!("failed to create {}", self.config.output_dir.display())
        })?;
        let encoder_path = self.config.encoder_checkpoint();
        let heads_path = self.config.heads_checkpoint();
        self.encoder_vars.save(&encoder_path)?;
        self.head_vars.save(&heads_path)?;
        info!(
            encoder = %encoder_path.display(),
            heads = %heads_path.display(),
            "checkpoint saved"
        );
        Ok(())
    }
}

/// `tokenizer.json` if present, else the BERT `vocab.txt`.
fn load_vocab(model_dir: &Path) -> Result<CharVocab> {
    let tokenizer = model_dir.join("tokenizer.json");
    let path = if tokenizer.is_file() {
        tokenizer
    } else {
        model_dir.join("vocab.txt")
    };
    CharVocab::from_file(&path).with_context(|| format!("failed to load vocabulary {}", path.display()))
}

/// Fine-tuned weights outside train mode, else pretrained weights, else none.
fn load_encoder_weights(config: &TrainConfig, vars: &mut VarMap) -> Result<()> {
    let fine_tuned = config.encoder_checkpoint();
    let pretrained = config.model_dir.join("model.safetensors");
    let path = if config.mode != Mode::Train && fine_tuned.is_file() {
        fine_tuned
    } else if pretrained.is_file() {
        pretrained
    } else {
        warn!(model_dir = %config.model_dir.display(), "no encoder weights found, starting from random initialization");
        return Ok(());
    };
    vars.load(&path)
        .with_context(|| format!("failed to load encoder weights {}", path.display()))?;
    info!(path = %path.display(), "encoder weights loaded");
    Ok(())
}
