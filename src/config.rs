use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub python: Python,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub split: Split,
    #[serde(default)]
    pub partition: Partition,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    /// Upper bound on parts being partitioned at once, across every pool.
    pub max_parallel_parts: usize,
    pub keep_intermediates: bool,
    /// Skip the partitioner and emit placeholder segments.
    pub dry_run: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            max_parallel_parts: 6,
            keep_intermediates: false,
            dry_run: false,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub work_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            work_dir: ".bulk-partition-work".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Python {
    /// Interpreter path; "auto" probes $UNSTRUCTURED_PYTHON then python3.
    pub exe: String,
    /// 0 disables the per-part timeout.
    pub part_timeout_seconds: u64,
    pub helper_timeout_seconds: u64,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Python {
    fn default() -> Self {
        Self {
            exe: "python3".into(),
            part_timeout_seconds: 2 * 60 * 60,
            helper_timeout_seconds: 300,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub djvutxt_exe: String,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            djvutxt_exe: "tools/djvutxt".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scan {
    pub extensions: Vec<String>,
    pub checkpoint_filename: String,
}
impl Default for Scan {
    fn default() -> Self {
        Self {
            extensions: ["pdf", "epub", "mobi", "prc", "azw", "azw3", "html", "htm", "djvu"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            checkpoint_filename: "progress.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Split {
    pub break_size_mb: f64,
    pub break_parts_max: usize,
}
impl Default for Split {
    fn default() -> Self {
        Self {
            break_size_mb: 5.0,
            break_parts_max: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fast,
    HiRes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    None,
    ByTitle,
}

/// Settings forwarded verbatim to the partitioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Partition {
    pub strategy: Strategy,
    pub include_page_breaks: bool,
    pub chunking_strategy: ChunkingStrategy,
}
impl Default for Partition {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fast,
            include_page_breaks: true,
            chunking_strategy: ChunkingStrategy::ByTitle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            report_filename: "extract-report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_python_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            pin_scripts_dir: false,
        }
    }
}
