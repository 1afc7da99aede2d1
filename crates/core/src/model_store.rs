//! Durable location of the most recent trained model.
//!
//! The artifact and its label map travel in one file that is replaced by an
//! atomic rename, so a reader never sees halves of two training runs.

use crate::error::Result;
use crate::models::TrainedModel;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored model, or `None` if no training run has completed yet.
    pub fn load(&self) -> Result<Option<TrainedModel>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        let model = bincode::deserialize(&bytes)?;
        Ok(Some(model))
    }

    pub fn save(&self, model: &TrainedModel) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut staged = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            bincode::serialize_into(&mut writer, model)?;
            writer.flush()?;
        }
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        tracing::debug!("model written to {}", self.path.display());
        Ok(())
    }
}
