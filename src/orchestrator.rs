use crate::{
    checkpoint::{CheckpointState, CheckpointStore},
    config::Config,
    engine::Engine,
    error::ExtractError,
    pool::PoolManager,
    report::{FileReport, RunReport, RunState},
    resource::{LoadEnv, Resource},
    scan,
    segment::write_segments,
    shutdown::CancelToken,
    util::{absolutize, ensure_dir, now_rfc3339},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Continue from the recorded progress index.
    Resume,
    /// Rescan and append newly found files to the recorded list.
    Rescan,
}

/// Questions the orchestrator asks whoever is driving it.
pub trait RunPrompt {
    fn resume_decision(&mut self, checkpoint: &CheckpointState) -> ResumeDecision;
    fn confirm_start(&mut self, pending: usize) -> bool;
}

/// Fixed answers, for non-interactive runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt {
    pub decision: ResumeDecision,
    pub confirm: bool,
}

impl Default for FixedPrompt {
    fn default() -> Self {
        Self {
            decision: ResumeDecision::Resume,
            confirm: true,
        }
    }
}

impl RunPrompt for FixedPrompt {
    fn resume_decision(&mut self, _checkpoint: &CheckpointState) -> ResumeDecision {
        self.decision
    }

    fn confirm_start(&mut self, _pending: usize) -> bool {
        self.confirm
    }
}

pub struct Orchestrator {
    cfg: Config,
    root: PathBuf,
    work_dir: PathBuf,
    engine: Arc<dyn Engine>,
    pools: PoolManager,
    shutdown: CancelToken,
    store: CheckpointStore,
    state: RunState,
}

impl Orchestrator {
    /// Resolve `root` and set up the run. Fails only if the directory cannot
    /// be found.
    pub fn new(
        cfg: &Config,
        root: &Path,
        engine: Arc<dyn Engine>,
        shutdown: CancelToken,
    ) -> Result<Self, ExtractError> {
        let root = scan::resolve_root(root)?;
        info!("scan root: {}", root.display());
        let store = CheckpointStore::in_dir(&root, &cfg.scan.checkpoint_filename);
        let work_dir = PathBuf::from(&cfg.paths.work_dir);
        if let Err(err) = ensure_dir(&work_dir) {
            warn!("{err:#}");
        }
        Ok(Self {
            work_dir: absolutize(&work_dir),
            pools: PoolManager::new(cfg.global.max_parallel_parts, shutdown.clone()),
            cfg: cfg.clone(),
            root,
            engine,
            shutdown,
            store,
            state: RunState::Idle,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Scan, or reload the checkpoint and let the caller choose between
    /// resuming and rescanning.
    pub fn prepare(&mut self, prompt: &mut dyn RunPrompt) -> CheckpointState {
        self.state = RunState::Idle;
        info!("looking for a previous session in {}", self.root.display());
        let skip = [self.work_dir.clone()];

        let checkpoint = match self.store.load() {
            None => {
                let files = scan::scan(&self.root, &self.cfg.scan.extensions, &[], &skip);
                info!("found {} applicable files", files.len());
                self.state = RunState::Scanned;
                CheckpointState::fresh(files)
            }
            Some(existing) => {
                self.state = RunState::AwaitingResumeDecision;
                match prompt.resume_decision(&existing) {
                    ResumeDecision::Resume => existing,
                    ResumeDecision::Rescan => {
                        let files = scan::scan(
                            &self.root,
                            &self.cfg.scan.extensions,
                            &existing.files,
                            &skip,
                        );
                        info!(
                            "rescan: {} files ({} new)",
                            files.len(),
                            files.len() - existing.files.len()
                        );
                        CheckpointState {
                            files,
                            progress_index: existing.progress_index,
                        }
                    }
                }
            }
        };
        self.state = RunState::Scanned;
        checkpoint
    }

    pub fn run(&mut self, prompt: &mut dyn RunPrompt) -> Result<RunReport, ExtractError> {
        let checkpoint = self.prepare(prompt);
        let pending = checkpoint.remaining().len();
        if !prompt.confirm_start(pending) {
            info!("extraction declined");
            self.state = RunState::Declined;
            let mut report = self.new_report(&checkpoint);
            report.state = self.state;
            return Ok(report);
        }
        self.extract(checkpoint)
    }

    /// Process every file from the checkpoint's progress index onwards.
    pub fn extract(&mut self, mut checkpoint: CheckpointState) -> Result<RunReport, ExtractError> {
        self.state = RunState::Extracting;
        let mut report = self.new_report(&checkpoint);
        self.store.save(&checkpoint)?;
        if let Err(err) = ensure_dir(&self.work_dir) {
            warn!("{err:#}");
        }

        let total = checkpoint.files.len();
        info!(
            "extracting {} of {} files",
            checkpoint.remaining().len(),
            total
        );

        while checkpoint.progress_index < total {
            if self.shutdown.is_cancelled() {
                return self.interrupt(&checkpoint, report);
            }
            let path = checkpoint.files[checkpoint.progress_index].clone();
            info!(
                "[{}/{}] {}",
                checkpoint.progress_index + 1,
                total,
                path.display()
            );

            let (file_report, outcome) = self.process_file(&path);
            match outcome {
                Err(ExtractError::Cancelled) => return self.interrupt(&checkpoint, report),
                Err(err) => {
                    warn!("skipping {}: {err}", path.display());
                    report.failed += 1;
                }
                Ok(()) => report.succeeded += 1,
            }
            report.files.push(file_report);

            checkpoint.progress_index += 1;
            report.progress_index = checkpoint.progress_index;
            self.store.save(&checkpoint)?;
        }

        self.state = RunState::Completed;
        if let Err(err) = self.store.clear() {
            warn!("{err:#}");
        }
        info!(
            "done: {} succeeded, {} failed",
            report.succeeded, report.failed
        );
        Ok(self.finish(report))
    }

    fn interrupt(
        &mut self,
        checkpoint: &CheckpointState,
        report: RunReport,
    ) -> Result<RunReport, ExtractError> {
        let released = self.pools.release_all();
        debug!("released {released} pools on interrupt");
        self.store.save(checkpoint)?;
        self.state = RunState::Interrupted;
        warn!(
            "interrupted: {}/{} files done; checkpoint kept at {}",
            checkpoint.progress_index,
            checkpoint.files.len(),
            self.store.path().display()
        );
        Ok(self.finish(report))
    }

    fn new_report(&self, checkpoint: &CheckpointState) -> RunReport {
        RunReport {
            root: self.root.clone(),
            state: self.state,
            total_files: checkpoint.files.len(),
            resumed_at: checkpoint.progress_index,
            progress_index: checkpoint.progress_index,
            succeeded: 0,
            failed: 0,
            files: Vec::new(),
            started: now_rfc3339(),
            finished: None,
        }
    }

    fn finish(&self, mut report: RunReport) -> RunReport {
        report.state = self.state;
        report.finished = Some(now_rfc3339());
        if self.cfg.output.write_report_json {
            let path = self.root.join(&self.cfg.output.report_filename);
            let written = serde_json::to_string_pretty(&report)
                .map_err(anyhow::Error::from)
                .and_then(|json| std::fs::write(&path, json).map_err(anyhow::Error::from));
            if let Err(err) = written {
                warn!("writing report {} failed: {err:#}", path.display());
            }
        }
        report
    }

    /// Load one file and write its segments. Never panics the run; the
    /// outcome says whether it counts as succeeded, failed or cancelled.
    fn process_file(&self, path: &Path) -> (FileReport, Result<(), ExtractError>) {
        let mut resource = Resource::new(path);
        let env = LoadEnv {
            cfg: &self.cfg,
            engine: self.engine.clone(),
            pools: &self.pools,
            shutdown: &self.shutdown,
            work_dir: &self.work_dir,
        };

        let loaded = resource.load(&env);
        let mut report = FileReport {
            path: path.to_path_buf(),
            format: resource.format().to_string(),
            status: resource.aggregate_status(),
            parts: resource.part_count(),
            segments: Vec::new(),
            error: None,
        };
        if let Err(err) = loaded {
            if !matches!(err, ExtractError::Cancelled) {
                error!("{err}");
                report.error = Some(err.to_string());
            }
            return (report, Err(err));
        }

        let Some(parts) = resource.into_content() else {
            let err = ExtractError::PartitionFailure {
                path: path.to_path_buf(),
                part: 0,
                reason: "loaded without content".into(),
            };
            report.status = -1;
            report.error = Some(err.to_string());
            return (report, Err(err));
        };

        match write_segments(path, &parts) {
            Ok(segments) => {
                info!("saved {} segments for {}", segments.len(), path.display());
                report.segments = segments;
                (report, Ok(()))
            }
            Err(err) => {
                error!("{err}");
                report.status = -1;
                report.error = Some(err.to_string());
                (report, Err(err))
            }
        }
    }
}
