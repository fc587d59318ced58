use crate::error::ExtractError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub files: Vec<PathBuf>,
    pub progress_index: usize,
}

impl CheckpointState {
    pub fn fresh(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            progress_index: 0,
        }
    }

    pub fn remaining(&self) -> &[PathBuf] {
        &self.files[self.progress_index.min(self.files.len())..]
    }

    pub fn is_complete(&self) -> bool {
        self.progress_index >= self.files.len()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(root: &Path, filename: &str) -> Self {
        Self::new(root.join(filename))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, state: &CheckpointState) -> Result<(), ExtractError> {
        self.write_atomic(state)
            .map_err(|source| ExtractError::CheckpointWrite {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            path = %self.path.display(),
            progress_index = state.progress_index,
            files = state.files.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn write_atomic(&self, state: &CheckpointState) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let json = serde_json::to_vec(state)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("create temp file in {}", parent.display()))?;
        tmp.write_all(&json).with_context(|| "write checkpoint")?;
        tmp.flush()?;
        tmp.as_file().sync_all().with_context(|| "sync checkpoint")?;
        tmp.persist(&self.path)
            .with_context(|| format!("persist checkpoint to {}", self.path.display()))?;
        Ok(())
    }

    /// `None` when there is no usable record. A corrupt record is reported
    /// and treated as absent.
    pub fn load(&self) -> Option<CheckpointState> {
        match self.read() {
            Ok(state) => state,
            Err(err) => {
                warn!("{err}; starting fresh");
                None
            }
        }
    }

    fn read(&self) -> Result<Option<CheckpointState>, ExtractError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };
        let state: CheckpointState =
            serde_json::from_slice(&raw).map_err(|e| self.corrupt(e.to_string()))?;
        if state.progress_index > state.files.len() {
            return Err(self.corrupt(format!(
                "progress_index {} exceeds {} files",
                state.progress_index,
                state.files.len()
            )));
        }
        info!(
            "found checkpoint: {}/{} files done",
            state.progress_index,
            state.files.len()
        );
        Ok(Some(state))
    }

    fn corrupt(&self, reason: String) -> ExtractError {
        ExtractError::CheckpointCorrupt {
            path: self.path.clone(),
            reason,
        }
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("removed checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("removing checkpoint {}", self.path.display()))
            }
        }
    }
}
