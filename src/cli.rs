use crate::{
    checkpoint::CheckpointState,
    config::Config,
    engine::{dry::DryRunEngine, python::PythonEngine, Engine},
    orchestrator::{Orchestrator, ResumeDecision, RunPrompt},
    report::RunState,
    resource::{Format, Resource},
    scan,
    shutdown::{install_ctrlc, CancelToken},
    split::group_items,
    util::{absolutize, ensure_dir},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "bulk-partition")]
#[command(about = "Resumable bulk document partitioner (PDF/EPUB/MOBI/HTML/DJVU)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./bulk-partition.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    /// List the files a run over `dir` would process.
    Scan {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Show how a single file would be split.
    Plan {
        #[arg(long)]
        input: PathBuf,
    },
    Run {
        /// Root directory; asked for interactively when omitted.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Continue from an existing checkpoint without asking.
        #[arg(long, conflicts_with = "rescan")]
        resume: bool,
        /// Rescan and append new files to an existing checkpoint.
        #[arg(long)]
        rescan: bool,
        /// Start extracting without confirmation.
        #[arg(long, short = 'y')]
        yes: bool,
        /// Use placeholder output instead of the partitioner.
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = match &cfg_path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
    match &cfg_path {
        Some(p) => info!("config: {}", p.display()),
        None => info!("config: built-in defaults"),
    }

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Scan { dir } => scan_dir(&cfg, dir),
        Command::Plan { input } => plan(&cfg, input),
        Command::Run {
            dir,
            resume,
            rescan,
            yes,
            dry_run,
        } => {
            let mut cfg = cfg;
            cfg.global.dry_run |= *dry_run;
            let preset = match (*resume, *rescan) {
                (true, _) => Some(ResumeDecision::Resume),
                (_, true) => Some(ResumeDecision::Rescan),
                _ => None,
            };
            let mut prompt = StdinPrompt {
                preset,
                assume_yes: *yes,
            };
            let dir = match dir {
                Some(d) => d.clone(),
                None => prompt.ask_dir()?,
            };
            run(&cfg, &dir, &mut prompt)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = user {
        if !p.exists() {
            return Err(anyhow!("config file not found: {}", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    for candidate in ["bulk-partition.toml", "bulk-partition.example.toml"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Ok(Some(p));
        }
    }
    Ok(None)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON summary, so logs go to stderr
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.work_dir).join("bulk-partition.log"))
}

fn build_engine(cfg: &Config) -> Result<Arc<dyn Engine>> {
    if cfg.global.dry_run {
        warn!("dry run: the partitioner is not invoked");
        return Ok(Arc::new(DryRunEngine));
    }
    Ok(Arc::new(PythonEngine::new(cfg)?))
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = build_engine(cfg)?;
    let diag = engine.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        return Err(anyhow!(
            "partitioner unavailable: {}",
            diag.error.unwrap_or_default()
        ));
    }
    Ok(())
}

fn scan_dir(cfg: &Config, dir: &Path) -> Result<()> {
    let root = scan::resolve_root(dir)?;
    let work_dir = absolutize(Path::new(&cfg.paths.work_dir));
    let files = scan::scan(&root, &cfg.scan.extensions, &[], &[work_dir]);
    let listing: Vec<_> = files
        .iter()
        .map(|f| {
            serde_json::json!({
                "path": f,
                "format": Format::from_path(f),
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "root": root,
            "count": files.len(),
            "files": listing,
        }))?
    );
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    if !input.is_file() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    let resource = Resource::new(input);
    let size_mb = resource.size_mb()?;
    let planned = resource.plan_split(cfg);

    let ranges = if resource.format() == Format::Epub && planned > 1 {
        let engine = build_engine(cfg)?;
        let probe = engine.probe_epub(input, &CancelToken::new())?;
        group_items(probe.item_count, planned)
    } else {
        Vec::new()
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "format": resource.format(),
            "size_mb": size_mb,
            "planned_parts": planned,
            "item_ranges": ranges,
        }))?
    );
    Ok(())
}

fn run(cfg: &Config, dir: &Path, prompt: &mut StdinPrompt) -> Result<()> {
    let shutdown = CancelToken::new();
    install_ctrlc(&shutdown)?;

    if cfg.debug.dump_effective_config {
        let work_dir = Path::new(&cfg.paths.work_dir);
        ensure_dir(work_dir)?;
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(work_dir.join("effective-config.toml"), raw)?;
    }

    let engine = build_engine(cfg)?;
    let mut orchestrator = Orchestrator::new(cfg, dir, engine, shutdown)?;
    let report = orchestrator.run(prompt)?;

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "root": report.root,
                "state": report.state,
                "total_files": report.total_files,
                "processed": report.processed(),
                "succeeded": report.succeeded,
                "failed": report.failed,
                "progress_index": report.progress_index,
            }))?
        );
    }

    if report.state == RunState::Interrupted {
        info!(
            "resume later with: bulk-partition run --dir {} --resume",
            report.root.display()
        );
    }
    Ok(())
}

/// Answers orchestrator questions from flags, falling back to stdin.
struct StdinPrompt {
    preset: Option<ResumeDecision>,
    assume_yes: bool,
}

impl StdinPrompt {
    fn ask(&self, question: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{question} ")?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .with_context(|| "reading stdin")?;
        Ok(line.trim().to_string())
    }

    fn ask_dir(&self) -> Result<PathBuf> {
        let answer = self.ask("Directory to extract:")?;
        if answer.is_empty() {
            return Err(anyhow!("no directory given"));
        }
        Ok(PathBuf::from(answer))
    }
}

impl RunPrompt for StdinPrompt {
    fn resume_decision(&mut self, checkpoint: &CheckpointState) -> ResumeDecision {
        if let Some(decision) = self.preset {
            return decision;
        }
        let question = format!(
            "Found a previous session ({}/{} files done). [r]esume or re[s]can?",
            checkpoint.progress_index,
            checkpoint.files.len()
        );
        match self.ask(&question) {
            Ok(a) if a.eq_ignore_ascii_case("s") || a.eq_ignore_ascii_case("rescan") => {
                ResumeDecision::Rescan
            }
            Ok(_) => ResumeDecision::Resume,
            Err(err) => {
                warn!("{err:#}; resuming");
                ResumeDecision::Resume
            }
        }
    }

    fn confirm_start(&mut self, pending: usize) -> bool {
        if self.assume_yes {
            return true;
        }
        match self.ask(&format!("{pending} files to extract. Start? [y/N]")) {
            Ok(a) => a.eq_ignore_ascii_case("y") || a.eq_ignore_ascii_case("yes"),
            Err(err) => {
                warn!("{err:#}");
                false
            }
        }
    }
}
