//! Task-keyed label encoder registry.
//!
//! Passed through pipeline construction instead of living in process-global
//! state. Construction for one task is serialized under the write lock, so
//! concurrent builders agree on a single alphabet (first writer wins).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{Result, ZhnerError};
use crate::labels::encoder::{LabelEncoder, LabelSource};
use crate::types::Mode;

#[derive(Debug, Default)]
pub struct LabelRegistry {
    encoders: RwLock<HashMap<String, Arc<LabelEncoder>>>,
    dir: Option<PathBuf>,
}

impl LabelRegistry {
    /// In-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that persists train-mode builds under `dir` and loads them
    /// back for eval/predict.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            encoders: RwLock::default(),
            dir: Some(dir.into()),
        }
    }

    fn path_for(dir: &Path, task: &str) -> PathBuf {
        dir.join(format!("{task}_label_encoder.json"))
    }

    /// Encoder for `task`, if one has been built or loaded.
    pub fn get(&self, task: &str) -> Option<Arc<LabelEncoder>> {
        self.encoders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(task)
            .cloned()
    }

    /// Return the encoder for `task`, building it if absent.
    ///
    /// An existing encoder is always reused. Observed-label sources only
    /// build in [`Mode::Train`]; other modes load the persisted alphabet or
    /// fail with [`ZhnerError::EncoderMissing`]. Fixed alphabets build in
    /// any mode.
    pub fn build_or_load(
        &self,
        task: &str,
        mode: Mode,
        source: &LabelSource,
        zero_class: &str,
    ) -> Result<Arc<LabelEncoder>> {
        if let Some(existing) = self.get(task) {
            return Ok(existing);
        }

        let mut encoders = self
            .encoders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Another writer may have won the race since the read above.
        if let Some(existing) = encoders.get(task) {
            return Ok(Arc::clone(existing));
        }

        let persisted = self
            .dir
            .as_deref()
            .map(|dir| Self::path_for(dir, task))
            .filter(|path| path.exists());

        let encoder = match persisted {
            Some(path) => {
                debug!(task, path = %path.display(), "loading label encoder");
                LabelEncoder::load(&path)?
            }
            None if mode.may_build_labels() || source.is_fixed() => {
                let encoder = LabelEncoder::build(task, source, zero_class);
                info!(task, %mode, labels = encoder.len(), "built label encoder");
                if let (Some(dir), true) = (self.dir.as_deref(), mode.may_build_labels()) {
                    std::fs::create_dir_all(dir).map_err(|source| ZhnerError::Io {
                        path: dir.to_path_buf(),
                        source,
                    })?;
                    encoder.save(&Self::path_for(dir, task))?;
                }
                encoder
            }
            None => {
                return Err(ZhnerError::EncoderMissing {
                    task: task.to_string(),
                });
            }
        };

        let encoder = Arc::new(encoder);
        encoders.insert(task.to_string(), Arc::clone(&encoder));
        Ok(encoder)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.encoders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
