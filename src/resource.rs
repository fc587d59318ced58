use crate::{
    config::{Config, Partition},
    engine::{Engine, PartitionIn},
    error::ExtractError,
    pool::{PartJob, PoolManager},
    segment::document_name,
    shutdown::CancelToken,
    split::{group_items, plan_parts},
    util::ScratchDir,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Html,
    Pdf,
    Epub,
    Mobi,
    Djvu,
}

impl Format {
    /// Extension dispatch; anything unrecognised is handed to the HTML
    /// variant, whose partitioner call auto-detects the type.
    pub fn from_path(path: &Path) -> Format {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Format::Pdf,
            "epub" => Format::Epub,
            "mobi" | "prc" => Format::Mobi,
            e if e.starts_with("azw") => Format::Mobi,
            "djvu" => Format::Djvu,
            _ => Format::Html,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Pdf => "pdf",
            Format::Epub => "epub",
            Format::Mobi => "mobi",
            Format::Djvu => "djvu",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotStarted,
    /// Percent of parts completed, 1..=99.
    Loading(u8),
    Done,
    Failed,
}

impl LoadStatus {
    pub fn from_progress(done: usize, total: usize) -> Self {
        if total == 0 || done == 0 {
            return LoadStatus::NotStarted;
        }
        if done >= total {
            return LoadStatus::Done;
        }
        let pct = (100 * done / total).clamp(1, 99);
        LoadStatus::Loading(pct as u8)
    }

    /// 0 not started, 1..99 percent, 100 done, -1 failed.
    pub fn code(self) -> i32 {
        match self {
            LoadStatus::NotStarted => 0,
            LoadStatus::Loading(p) => p as i32,
            LoadStatus::Done => 100,
            LoadStatus::Failed => -1,
        }
    }
}

/// Output of one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartContent {
    /// Ordered elements as returned by the partitioner.
    Elements(Vec<serde_json::Value>),
    /// Raw extracted text (DJVU).
    Text(String),
}

/// What a resource needs from the run while it loads.
pub struct LoadEnv<'a> {
    pub cfg: &'a Config,
    pub engine: Arc<dyn Engine>,
    pub pools: &'a PoolManager,
    pub shutdown: &'a CancelToken,
    pub work_dir: &'a Path,
}

#[derive(Debug)]
pub struct Resource {
    path: PathBuf,
    format: Format,
    parts: Vec<PathBuf>,
    content: Vec<Option<PartContent>>,
    status: LoadStatus,
    last_access: Option<OffsetDateTime>,
    converted: Option<PathBuf>,
}

impl Resource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = Format::from_path(&path);
        Self::with_format(path, format)
    }

    pub fn with_format(path: impl Into<PathBuf>, format: Format) -> Self {
        let path = path.into();
        Self {
            parts: vec![path.clone()],
            path,
            format,
            content: Vec::new(),
            status: LoadStatus::NotStarted,
            last_access: None,
            converted: None,
        }
    }

    /// Variant for a file produced by the MOBI converter. Only HTML, EPUB and
    /// PDF are accepted, which keeps conversion from recursing.
    pub fn delegate_for(converted: &Path) -> Result<Resource> {
        let ext = converted
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let format = match ext.as_str() {
            "html" | "htm" => Format::Html,
            "epub" => Format::Epub,
            "pdf" => Format::Pdf,
            _ if Format::from_path(converted) == Format::Mobi => {
                bail!("converter produced another MOBI container: {}", converted.display())
            }
            other => bail!("unknown file type after conversion: {other:?}"),
        };
        Ok(Resource::with_format(converted, format))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn part_count(&self) -> usize {
        self.parts.len().max(1)
    }

    pub fn parts(&self) -> &[PathBuf] {
        &self.parts
    }

    pub fn status(&self) -> LoadStatus {
        self.status
    }

    pub fn aggregate_status(&self) -> i32 {
        self.status.code()
    }

    pub fn last_access(&self) -> Option<OffsetDateTime> {
        self.last_access
    }

    /// File the MOBI converter produced, if this resource went through it.
    pub fn converted(&self) -> Option<&Path> {
        self.converted.as_deref()
    }

    /// All parts in index order, once loading is done.
    pub fn content(&self) -> Option<Vec<&PartContent>> {
        if self.status != LoadStatus::Done {
            return None;
        }
        self.content.iter().map(Option::as_ref).collect()
    }

    pub fn into_content(self) -> Option<Vec<PartContent>> {
        if self.status != LoadStatus::Done {
            return None;
        }
        self.content.into_iter().collect()
    }

    pub fn size_bytes(&self) -> Result<u64> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("stat {}", self.path.display()))?;
        Ok(meta.len())
    }

    pub fn size_mb(&self) -> Result<f64> {
        Ok(self.size_bytes()? as f64 / BYTES_PER_MB)
    }

    /// Planned part count. Only EPUB splits.
    pub fn plan_split(&self, cfg: &Config) -> usize {
        match self.format {
            Format::Epub => match self.size_mb() {
                Ok(mb) => plan_parts(cfg, mb),
                Err(err) => {
                    warn!("{err:#}; not splitting");
                    1
                }
            },
            Format::Html | Format::Pdf | Format::Mobi | Format::Djvu => 1,
        }
    }

    /// Produce `count` independently partitionable files and return them.
    ///
    /// Anything that prevents a split (non-EPUB, fewer than two items, a
    /// failing helper) leaves the resource as a single part.
    pub fn materialize_parts(
        &mut self,
        count: usize,
        env: &LoadEnv<'_>,
        out_dir: &Path,
    ) -> Vec<PathBuf> {
        self.parts = vec![self.path.clone()];
        if self.format != Format::Epub || count < 2 {
            return self.parts.clone();
        }

        let probe = match env.engine.probe_epub(&self.path, env.shutdown) {
            Ok(p) => p,
            Err(err) => {
                warn!("epub probe failed for {}; not splitting: {err:#}", self.name());
                return self.parts.clone();
            }
        };
        let groups = group_items(probe.item_count, count);
        if groups.len() < 2 {
            debug!(
                "{} has {} items; too short to split",
                self.name(),
                probe.item_count
            );
            return self.parts.clone();
        }

        info!("splitting {} into {} parts", self.name(), groups.len());
        match env
            .engine
            .split_epub(&self.path, out_dir, &groups, env.shutdown)
        {
            Ok(mut outputs) if outputs.len() == groups.len() => {
                outputs.sort_by_key(|p| p.index);
                self.parts = outputs.into_iter().map(|p| PathBuf::from(p.path)).collect();
            }
            Ok(outputs) => warn!(
                "split of {} returned {} parts, expected {}; using the whole book",
                self.name(),
                outputs.len(),
                groups.len()
            ),
            Err(err) => warn!(
                "split of {} failed; falling back to a single part: {err:#}",
                self.name()
            ),
        }
        self.parts.clone()
    }

    /// Load part `index` on the calling thread.
    pub fn load_part(
        &self,
        index: usize,
        env: &LoadEnv<'_>,
        scratch: &Path,
        cancel: &CancelToken,
    ) -> Result<PartContent> {
        self.part_task(index, env, scratch)?.run(cancel)
    }

    fn part_task(&self, index: usize, env: &LoadEnv<'_>, scratch: &Path) -> Result<PartTask> {
        let file = self
            .parts
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("{} has no part {index}", self.name()))?;
        let text_out = scratch.join(format!("{}_{index}.txt", document_name(&self.path)));
        Ok(PartTask {
            engine: env.engine.clone(),
            file,
            format: self.format,
            settings: env.cfg.partition.clone(),
            text_out,
        })
    }

    /// Split, partition every part and collect the results.
    ///
    /// Errors are also reflected in [`Resource::status`]: `Failed` for
    /// conversion or part failures, unchanged progress for cancellation.
    pub fn load(&mut self, env: &LoadEnv<'_>) -> Result<(), ExtractError> {
        self.load_at_depth(env, 0)
    }

    fn load_at_depth(&mut self, env: &LoadEnv<'_>, depth: usize) -> Result<(), ExtractError> {
        if env.shutdown.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let result = match self.format {
            Format::Mobi => self.load_converted(env, depth),
            _ => self.load_pooled(env),
        };
        if let Err(err) = &result {
            if !matches!(err, ExtractError::Cancelled) {
                self.status = LoadStatus::Failed;
            }
        }
        result
    }

    fn scratch(&self, env: &LoadEnv<'_>, suffix: &str) -> Result<ScratchDir, ExtractError> {
        let dir = env
            .work_dir
            .join(format!("{}_{suffix}", document_name(&self.path)));
        ScratchDir::create(dir, env.cfg.global.keep_intermediates).map_err(|e| {
            ExtractError::ConversionFailure {
                path: self.path.clone(),
                reason: format!("{e:#}"),
            }
        })
    }

    fn load_converted(&mut self, env: &LoadEnv<'_>, depth: usize) -> Result<(), ExtractError> {
        if depth > 0 {
            return Err(self.conversion_failure("nested MOBI conversion"));
        }
        // removed on every exit path when it drops
        let scratch = self.scratch(env, "convert")?;

        let converted = env
            .engine
            .convert_mobi(&self.path, scratch.path(), env.shutdown)
            .map_err(|e| {
                if env.shutdown.is_cancelled() {
                    ExtractError::Cancelled
                } else {
                    self.conversion_failure(format!("{e:#}"))
                }
            })?;
        let mut delegate =
            Resource::delegate_for(&converted).map_err(|e| self.conversion_failure(format!("{e:#}")))?;
        debug_assert_ne!(delegate.format, Format::Mobi);
        info!(
            "{} converted to {}; loading as {}",
            self.name(),
            converted.display(),
            delegate.format
        );

        let result = delegate.load_at_depth(env, depth + 1);

        self.parts = delegate.parts.clone();
        self.content = std::mem::take(&mut delegate.content);
        self.status = delegate.status;
        self.last_access = delegate.last_access;
        self.converted = Some(converted);
        result
    }

    fn conversion_failure(&self, reason: impl Into<String>) -> ExtractError {
        ExtractError::ConversionFailure {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn load_pooled(&mut self, env: &LoadEnv<'_>) -> Result<(), ExtractError> {
        let scratch = self.scratch(env, "parts")?;
        let planned = self.plan_split(env.cfg);
        let parts = self.materialize_parts(planned, env, scratch.path());
        let total = parts.len();
        debug!("{} planned {planned} parts, loading {total}", self.name());

        let mut jobs: Vec<PartJob<PartContent>> = Vec::with_capacity(total);
        for index in 0..total {
            let task = self
                .part_task(index, env, scratch.path())
                .map_err(|e| self.part_failure(index, e))?;
            jobs.push(Box::new(move |cancel: &CancelToken| task.run(cancel)));
        }

        let pool_name = self.path.display().to_string();
        let mut pool = env
            .pools
            .assign::<PartContent>(&pool_name, total)
            .map_err(|e| {
                if env.shutdown.is_cancelled() {
                    ExtractError::Cancelled
                } else {
                    self.part_failure(0, e)
                }
            })?;
        self.content = vec![None; total];
        self.status = LoadStatus::NotStarted;
        pool.dispatch(jobs);

        let mut done = 0usize;
        let mut failure = None;
        for result in pool.results() {
            match result.outcome {
                Ok(content) => {
                    if let Some(slot) = self.content.get_mut(result.index) {
                        if slot.replace(content).is_none() {
                            done += 1;
                        }
                    }
                    self.status = LoadStatus::from_progress(done, total);
                    info!(
                        "{}: part {}/{} done ({}%)",
                        self.name(),
                        result.index + 1,
                        total,
                        self.status.code()
                    );
                }
                Err(err) => {
                    failure = Some((result.index, err));
                    pool.cancel();
                    break;
                }
            }
        }
        env.pools.release_by_name(pool.name());

        if done < total && env.shutdown.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        if let Some((index, err)) = failure {
            return Err(self.part_failure(index, err));
        }
        if done < total {
            return Err(self.part_failure(
                done,
                anyhow!("pool exited with {done}/{total} parts complete"),
            ));
        }

        self.status = LoadStatus::Done;
        self.last_access = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    fn part_failure(&self, part: usize, err: anyhow::Error) -> ExtractError {
        let reason = format!("{err:#}");
        if self.format == Format::Djvu {
            ExtractError::ConversionFailure {
                path: self.path.clone(),
                reason,
            }
        } else {
            ExtractError::PartitionFailure {
                path: self.path.clone(),
                part,
                reason,
            }
        }
    }
}

/// Self-contained unit of work for one part, movable onto a worker thread.
struct PartTask {
    engine: Arc<dyn Engine>,
    file: PathBuf,
    format: Format,
    settings: Partition,
    text_out: PathBuf,
}

impl PartTask {
    fn run(&self, cancel: &CancelToken) -> Result<PartContent> {
        match self.format {
            Format::Djvu => {
                self.engine.extract_djvu(&self.file, &self.text_out, cancel)?;
                let raw = std::fs::read(&self.text_out)
                    .with_context(|| format!("reading {}", self.text_out.display()))?;
                if let Err(err) = std::fs::remove_file(&self.text_out) {
                    warn!("failed to remove {}: {err}", self.text_out.display());
                }
                Ok(PartContent::Text(String::from_utf8_lossy(&raw).into_owned()))
            }
            Format::Mobi => bail!("MOBI files are converted before partitioning"),
            Format::Html | Format::Pdf | Format::Epub => {
                let req = PartitionIn {
                    input: self.file.display().to_string(),
                    format: self.format,
                    settings: self.settings.clone(),
                };
                let out = self.engine.partition(&req, cancel)?;
                Ok(PartContent::Elements(out.elements))
            }
        }
    }
}
