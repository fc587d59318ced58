use super::{types::*, Engine};
use crate::{shutdown::CancelToken, split::ItemRange};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Stand-in engine for `global.dry_run`: touches no external tool and emits
/// one placeholder element per part, so a full run can be rehearsed against a
/// real directory without Python installed.
#[derive(Debug, Default, Clone)]
pub struct DryRunEngine;

impl Engine for DryRunEngine {
    fn doctor(&self) -> Result<DocDiag> {
        Ok(DocDiag {
            python_exe: "(dry run)".into(),
            python_version: "(dry run)".into(),
            unstructured_version: None,
            ok: true,
            error: None,
        })
    }

    fn partition(&self, req: &PartitionIn, _cancel: &CancelToken) -> Result<PartitionOut> {
        Ok(PartitionOut {
            ok: true,
            elements: vec![serde_json::json!({
                "type": "Placeholder",
                "text": "dry run",
                "metadata": { "filename": req.input, "format": req.format },
            })],
            error: None,
        })
    }

    fn probe_epub(&self, _input: &Path, _cancel: &CancelToken) -> Result<EpubProbe> {
        // a single item never splits
        Ok(EpubProbe {
            item_count: 1,
            error: None,
        })
    }

    fn split_epub(
        &self,
        input: &Path,
        _out_dir: &Path,
        _ranges: &[ItemRange],
        _cancel: &CancelToken,
    ) -> Result<Vec<SplitPart>> {
        Ok(vec![SplitPart {
            index: 0,
            path: input.display().to_string(),
        }])
    }

    fn convert_mobi(&self, input: &Path, out_dir: &Path, _cancel: &CancelToken) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".into());
        let out = out_dir.join(format!("{stem}.html"));
        std::fs::write(&out, "<html><body></body></html>")
            .with_context(|| format!("writing {}", out.display()))?;
        Ok(out)
    }

    fn extract_djvu(&self, _input: &Path, out_txt: &Path, _cancel: &CancelToken) -> Result<()> {
        std::fs::write(out_txt, "dry run")
            .with_context(|| format!("writing {}", out_txt.display()))
    }
}
