#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use bulk_partition::{
    config::Config,
    engine::{python::DjvuTool, DocDiag, Engine, EpubProbe, PartitionIn, PartitionOut, SplitPart},
    shutdown::CancelToken,
    split::{part_file_name, ItemRange},
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-process engine: no Python, records every call by file name.
#[derive(Default)]
pub struct FakeEngine {
    pub item_count: usize,
    /// Partition fails for inputs whose file name contains one of these.
    pub fail_on: Vec<String>,
    /// Extension of the file "converted" from a MOBI; `None` fails conversion.
    pub mobi_output: Option<(String, u64)>,
    /// Text djvutxt would produce; `None` runs a djvutxt that doesn't exist.
    pub djvu_text: Option<String>,
    /// Fire the token when partitioning a file whose name contains the string.
    pub cancel_on: Option<(String, CancelToken)>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            item_count: 20,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// File names passed to `partition`, sorted.
    pub fn partitioned(&self) -> Vec<String> {
        let mut v: Vec<String> = self
            .calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("partition:").map(str::to_string))
            .collect();
        v.sort();
        v
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Engine for FakeEngine {
    fn doctor(&self) -> Result<DocDiag> {
        Ok(DocDiag {
            python_exe: "fake".into(),
            python_version: "0".into(),
            unstructured_version: None,
            ok: true,
            error: None,
        })
    }

    fn partition(&self, req: &PartitionIn, _cancel: &CancelToken) -> Result<PartitionOut> {
        let name = file_name(Path::new(&req.input));
        self.record(format!("partition:{name}"));
        if let Some((pat, token)) = &self.cancel_on {
            if name.contains(pat.as_str()) {
                token.cancel();
                bail!("killed");
            }
        }
        if self.fail_on.iter().any(|f| name.contains(f.as_str())) {
            bail!("partitioner exploded on {name}");
        }
        Ok(PartitionOut {
            ok: true,
            elements: vec![serde_json::json!({"type": "NarrativeText", "text": name})],
            error: None,
        })
    }

    fn probe_epub(&self, input: &Path, _cancel: &CancelToken) -> Result<EpubProbe> {
        self.record(format!("probe:{}", file_name(input)));
        Ok(EpubProbe {
            item_count: self.item_count,
            error: None,
        })
    }

    fn split_epub(
        &self,
        input: &Path,
        out_dir: &Path,
        ranges: &[ItemRange],
        _cancel: &CancelToken,
    ) -> Result<Vec<SplitPart>> {
        self.record(format!("split:{}:{}", file_name(input), ranges.len()));
        ranges
            .iter()
            .enumerate()
            .map(|(index, r)| {
                let out = out_dir.join(part_file_name(input, index));
                std::fs::write(&out, format!("{}..{}", r.start, r.end))?;
                Ok(SplitPart {
                    index,
                    path: out.display().to_string(),
                })
            })
            .collect()
    }

    fn convert_mobi(&self, input: &Path, out_dir: &Path, _cancel: &CancelToken) -> Result<PathBuf> {
        self.record(format!("convert:{}", file_name(input)));
        let Some((ext, size)) = &self.mobi_output else {
            bail!("not a MOBI container");
        };
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let out = out_dir.join(format!("{stem}.{ext}"));
        let f = std::fs::File::create(&out).context("create converted")?;
        f.set_len(*size)?;
        Ok(out)
    }

    fn extract_djvu(&self, input: &Path, out_txt: &Path, cancel: &CancelToken) -> Result<()> {
        self.record(format!("djvu:{}", file_name(input)));
        match &self.djvu_text {
            Some(text) => Ok(std::fs::write(out_txt, text)?),
            None => DjvuTool::new(PathBuf::from("/nonexistent/djvutxt"))
                .extract(input, out_txt, None, cancel),
        }
    }
}

/// Config with scratch space under `work`.
pub fn test_config(work: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.work_dir = work.display().to_string();
    cfg.global.max_parallel_parts = 4;
    cfg
}

/// Create `name` under `dir` with a (sparse) length of `len` bytes.
pub fn touch(dir: &Path, name: &str, len: u64) -> PathBuf {
    let p = dir.join(name);
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let f = std::fs::File::create(&p).unwrap();
    f.set_len(len).unwrap();
    p
}
