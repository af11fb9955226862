use anyhow::Result;
use clap::Parser;
use tracing::info;
use zhner_core::Mode;
use zhner_trainer::{TrainConfig, Trainer, init_tracing};

fn main() -> Result<()> {
    init_tracing();
    let config = TrainConfig::parse();
    let predictions = config.predictions_path();
    let mode = config.mode;

    let mut trainer = Trainer::new(config)?;
    match mode {
        Mode::Train => trainer.train()?,
        Mode::Eval => {
            for (task, metrics) in trainer.evaluate()? {
                for (name, value) in metrics {
                    info!(task = %task, metric = %name, value, "evaluation");
                }
            }
        }
        Mode::Predict => {
            trainer.predict(&predictions)?;
        }
    }
    Ok(())
}
