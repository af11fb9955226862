use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use zhner_core::Mode;
use zhner_core::corpus::CorpusUnifier;
use zhner_core::labels::LabelRegistry;
use zhner_trainer::{PartitionStats, PrepareConfig, PreparedRecord, init_tracing, write_jsonl};

fn main() -> Result<()> {
    init_tracing();
    let config = PrepareConfig::parse();
    let unifier = CorpusUnifier::new(config.corpus.corpus_config())?;
    let registry = LabelRegistry::with_dir(config.output_dir.join("labels"));

    for &task in &config.tasks {
        // Train first so observed alphabets exist before eval reuses them.
        for mode in [Mode::Train, Mode::Eval] {
            let data = task
                .load(&unifier, &registry, mode)
                .with_context(|| format!("failed to load {task} ({mode})"))?;
            let partition = mode.to_string();
            let records: Vec<PreparedRecord> = if data.documents().is_empty() {
                data.examples()
                    .iter()
                    .map(|e| PreparedRecord::from_example(e, &partition))
                    .collect()
            } else {
                data.documents()
                    .iter()
                    .map(|d| PreparedRecord::from_document(task.name(), d, &partition))
                    .collect()
            };
            if records.is_empty() {
                warn!(task = %task, partition = %partition, "partition is empty");
            }

            let mut stats = PartitionStats::default();
            records.iter().for_each(|r| stats.observe(r));

            let path = config.output_dir.join(format!("{task}.{partition}.jsonl"));
            write_jsonl(&path, &records)?;
            info!(
                task = %task,
                partition = %partition,
                records = stats.records,
                characters = stats.characters,
                entities = ?stats.entities,
                path = %path.display(),
                "partition exported"
            );
        }
    }
    Ok(())
}
