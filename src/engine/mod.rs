pub mod dry;
pub mod python;
pub mod types;

use crate::{shutdown::CancelToken, split::ItemRange};
use anyhow::Result;
use std::path::{Path, PathBuf};

pub use types::{DocDiag, EpubProbe, PartitionIn, PartitionOut, SplitPart};

/// Every external capability the extractor leans on.
///
/// Implementations are shared across worker threads. Long-running calls take
/// a [`CancelToken`] and must return promptly once it fires.
pub trait Engine: Send + Sync {
    fn doctor(&self) -> Result<DocDiag>;

    /// Run the partitioner over one file (a whole document or one part).
    fn partition(&self, req: &PartitionIn, cancel: &CancelToken) -> Result<PartitionOut>;

    fn probe_epub(&self, input: &Path, cancel: &CancelToken) -> Result<EpubProbe>;

    /// Write one standalone EPUB per range into `out_dir`.
    fn split_epub(
        &self,
        input: &Path,
        out_dir: &Path,
        ranges: &[ItemRange],
        cancel: &CancelToken,
    ) -> Result<Vec<SplitPart>>;

    /// Convert a MOBI container into `out_dir`; returns the converted file
    /// (HTML, EPUB or PDF).
    fn convert_mobi(&self, input: &Path, out_dir: &Path, cancel: &CancelToken) -> Result<PathBuf>;

    /// Dump the hidden text layer of a DJVU file into `out_txt`.
    fn extract_djvu(&self, input: &Path, out_txt: &Path, cancel: &CancelToken) -> Result<()>;
}
