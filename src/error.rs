use std::path::PathBuf;
use thiserror::Error;

/// Failures that cross the resource boundary.
///
/// Only [`ExtractError::DirectoryNotFound`] and
/// [`ExtractError::CheckpointWrite`] abort a run; everything else is
/// contained to the file that produced it.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("directory not found: {raw} (tried: {tried})")]
    DirectoryNotFound { raw: String, tried: String },

    #[error("checkpoint unreadable at {path}: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("checkpoint write failed at {path}: {source:#}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("conversion failed for {path}: {reason}")]
    ConversionFailure { path: PathBuf, reason: String },

    #[error("partition failed for {path} part {part}: {reason}")]
    PartitionFailure {
        path: PathBuf,
        part: usize,
        reason: String,
    },

    #[error("writing segments for {path} failed: {source:#}")]
    SegmentWriteFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl ExtractError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::DirectoryNotFound { .. } | ExtractError::CheckpointWrite { .. }
        )
    }
}
