use crate::error::ExtractError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Resolve the scan root.
///
/// Tries the path as given, then relative to the directory holding the
/// running executable, then relative to the current working directory. The
/// winner is returned canonicalized so later logs and checkpoints carry one
/// unambiguous absolute root.
pub fn resolve_root(raw: &Path) -> Result<PathBuf, ExtractError> {
    let mut candidates = vec![raw.to_path_buf()];
    if raw.is_relative() {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(dir.join(raw));
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(raw));
        }
    }

    for candidate in &candidates {
        if candidate.is_dir() {
            return match candidate.canonicalize() {
                Ok(p) => Ok(p),
                Err(err) => {
                    warn!("canonicalize {} failed: {err}", candidate.display());
                    Ok(candidate.clone())
                }
            };
        }
    }

    Err(ExtractError::DirectoryNotFound {
        raw: raw.display().to_string(),
        tried: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Whether `name` ends in `.<ext>` for one of `extensions`, case-insensitively.
pub fn has_allowed_extension(name: &str, extensions: &[String]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| {
        let ext = ext.trim_start_matches('.').to_lowercase();
        !ext.is_empty() && lower.ends_with(&format!(".{ext}"))
    })
}

/// Walk `root` and merge matching files onto `known`.
///
/// Known files keep their positions; new ones are appended in sorted order.
/// The checkpoint's progress index stays valid across rescans because of
/// this. Directories in `skip` are not descended into. Paths that are not
/// valid UTF-8 cannot be checkpointed and are left out with a warning.
pub fn scan(
    root: &Path,
    extensions: &[String],
    known: &[PathBuf],
    skip: &[PathBuf],
) -> Vec<PathBuf> {
    let mut seen: HashSet<PathBuf> = known.iter().cloned().collect();
    let mut found = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir() && skip.iter().any(|s| e.path() == s.as_path()))
        });
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !has_allowed_extension(&name, extensions) {
            continue;
        }
        let path = entry.into_path();
        if path.to_str().is_none() {
            warn!("skipping non-UTF-8 path: {}", path.display());
            continue;
        }
        if seen.insert(path.clone()) {
            found.push(path);
        }
    }
    found.sort();
    debug!("scan of {} found {} new files", root.display(), found.len());

    let mut files = known.to_vec();
    files.extend(found);
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extension_match_requires_dot() {
        let e = exts(&["pdf", ".epub"]);
        assert!(has_allowed_extension("Report.PDF", &e));
        assert!(has_allowed_extension("a.b.epub", &e));
        assert!(!has_allowed_extension("notapdf", &e));
        assert!(!has_allowed_extension("x.pdf.txt", &e));
    }
}
