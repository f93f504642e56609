//! Optional side channel that receives every fetched page.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::navigator::Page;

/// Receives each page right after the navigator stores it as current page.
///
/// Implementations must not fail the navigation; errors are theirs to log.
pub trait PageSink {
    fn record(&self, method: &str, page: &Page);
}

/// Writes every page into a directory as `NNNN-<method>.html`.
pub struct DumpDir {
    dir: PathBuf,
    counter: AtomicUsize,
}

impl DumpDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of pages written so far.
    pub fn count(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl PageSink for DumpDir {
    fn record(&self, method: &str, page: &Page) {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .dir
            .join(format!("{:04}-{}.html", n, method.to_ascii_lowercase()));
        if let Err(e) = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, page.body())) {
            tracing::warn!("Failed to dump page {} to {}: {}", page.url(), path.display(), e);
        } else {
            tracing::debug!("Dumped {} to {}", page.url(), path.display());
        }
    }
}
