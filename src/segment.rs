use crate::{error::ExtractError, resource::PartContent, util::ensure_dir};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File stem with dots replaced, e.g. `vol.1.pdf` -> `vol_1`.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace('.', "_"))
        .unwrap_or_else(|| "document".to_string())
}

/// Sibling directory holding a document's segments.
pub fn segment_dir(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(document_name(path))
}

pub fn segment_path(path: &Path, part: usize) -> PathBuf {
    segment_dir(path).join(format!("{}_{part}.json", document_name(path)))
}

/// Write one pretty-printed JSON file per part next to `source`.
pub fn write_segments(source: &Path, parts: &[PartContent]) -> Result<Vec<PathBuf>, ExtractError> {
    write_all(source, parts).map_err(|e| ExtractError::SegmentWriteFailure {
        path: source.to_path_buf(),
        source: e,
    })
}

fn write_all(source: &Path, parts: &[PartContent]) -> Result<Vec<PathBuf>> {
    ensure_dir(&segment_dir(source))?;
    let mut written = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let out = segment_path(source, i);
        let json = serde_json::to_string_pretty(part)?;
        std::fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
        written.push(out);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_replace_dots() {
        let p = Path::new("/books/vol.1.final.pdf");
        assert_eq!(document_name(p), "vol_1_final");
        assert_eq!(segment_dir(p), PathBuf::from("/books/vol_1_final"));
        assert_eq!(
            segment_path(p, 3),
            PathBuf::from("/books/vol_1_final/vol_1_final_3.json")
        );
    }
}
