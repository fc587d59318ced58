use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of parts for a document of `size_mb`.
///
/// Linear ramp from 2 parts at the threshold up to `max_parts`, capped. The
/// equality check runs first so the slope can never divide by zero.
pub fn calculate_breaks(size_mb: f64, threshold_mb: f64, max_parts: usize) -> usize {
    if size_mb == threshold_mb {
        return 2;
    }
    if size_mb <= threshold_mb {
        return 2;
    }
    let max = max_parts as f64;
    let slope = (max - 2.0) / (size_mb - threshold_mb);
    // epsilon keeps `slope * delta` from flooring to max - 1
    let breaks = (slope * (size_mb - threshold_mb) + 2.0 + 1e-9).floor();
    (breaks as usize).min(max_parts)
}

/// Part count for a splittable resource: 1 below the break size, otherwise
/// the adaptive ramp.
pub fn plan_parts(cfg: &Config, size_mb: f64) -> usize {
    if size_mb > cfg.split.break_size_mb {
        calculate_breaks(size_mb, cfg.split.break_size_mb, cfg.split.break_parts_max).max(1)
    } else {
        1
    }
}

/// A contiguous run of book items, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRange {
    pub start: usize,
    pub end: usize,
}

impl ItemRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Group `item_count` items into `parts` contiguous ranges of
/// `item_count / parts` items each; the last range takes the remainder.
///
/// Returns an empty plan when there is nothing to split (`item_count < 2`).
/// `parts` is clamped to `item_count` so no range comes out empty.
pub fn group_items(item_count: usize, parts: usize) -> Vec<ItemRange> {
    if item_count < 2 {
        return Vec::new();
    }
    let parts = parts.clamp(1, item_count);
    let per_part = item_count / parts;

    (0..parts)
        .map(|k| {
            let start = k * per_part;
            let end = if k + 1 < parts {
                (k + 1) * per_part
            } else {
                item_count
            };
            ItemRange { start, end }
        })
        .collect()
}

/// `book.epub` -> `book_part3.epub` for zero-based part 2.
pub fn part_file_name(original: &Path, part: usize) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "part".to_string());
    match original.extension() {
        Some(ext) => format!("{stem}_part{}.{}", part + 1, ext.to_string_lossy()),
        None => format!("{stem}_part{}", part + 1),
    }
}
