use std::path::{Path, PathBuf};
use std::time::Duration;

/// An entry the walk could not read and left out of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Counters for one archive run.
#[derive(Debug, Clone, Default)]
pub struct ArchiveStats {
    /// Directory entries written.
    pub dirs: usize,

    /// Regular file entries written.
    pub files: usize,

    /// Symlink entries written.
    pub symlinks: usize,

    /// File content bytes written, before compression.
    pub bytes: u64,

    /// Entries left out because they could not be read.
    pub skipped: Vec<SkippedEntry>,

    /// Time taken by the producer.
    pub duration: Duration,
}

impl ArchiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> usize {
        self.dirs + self.files + self.symlinks
    }

    pub fn record_dir(&mut self) {
        self.dirs += 1;
    }

    pub fn record_file(&mut self, size: u64) {
        self.files += 1;
        self.bytes += size;
    }

    pub fn record_symlink(&mut self) {
        self.symlinks += 1;
    }

    pub fn record_skip(&mut self, path: &Path, reason: impl Into<String>) {
        self.skipped.push(SkippedEntry {
            path: path.to_path_buf(),
            reason: reason.into(),
        });
    }

    pub fn has_skips(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Entries: {} (dirs {}, files {}, symlinks {}), Bytes: {}, Skipped: {}, Duration: {:?}",
            self.entries(),
            self.dirs,
            self.files,
            self.symlinks,
            self.bytes,
            self.skipped.len(),
            self.duration
        )
    }
}
