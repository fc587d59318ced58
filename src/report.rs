use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scanned,
    AwaitingResumeDecision,
    Extracting,
    Completed,
    Interrupted,
    /// The caller declined to start extraction.
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub state: RunState,
    pub total_files: usize,
    /// Progress index the run started from.
    pub resumed_at: usize,
    /// Progress index when the run stopped.
    pub progress_index: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files: Vec<FileReport>,
    pub started: String,
    pub finished: Option<String>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub format: String,
    pub status: i32,
    pub parts: usize,
    #[serde(default)]
    pub segments: Vec<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}
