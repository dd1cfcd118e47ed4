//! Streams selected block directories as a gzip-compressed tar archive.
//!
//! A producer thread walks the blocks and writes tar entries through a gzip
//! encoder into a [`pipe`]; the calling thread copies the pipe's read end
//! into the caller's sink. Memory stays bounded by one file plus the pipe
//! depth regardless of dump size.
//!
//! Each tree is walked in file-name order, so identical inputs produce
//! identical entry sequences.

mod pipe;
mod stats;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use flate2::{Compression, GzBuilder};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tar::{EntryType, HeaderMode};
use walkdir::WalkDir;

use crate::catalog::Block;
use crate::error::{Error, Result};
use crate::layout::TsdbLayout;
use crate::time::{Clock, SystemClock, Timestamp};

pub use pipe::{pipe, PipeAbort, PipeReader, PipeWriter};
pub use stats::{ArchiveStats, SkippedEntry};

/// Written instead of an archive when no block matches the window.
pub const NO_DATA_MARKER: &str = "No persistent blocks found in the requested time range\n";

// Unknown OS, as written by Go's gzip writer.
const GZIP_OS_UNKNOWN: u8 = 255;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Prepend `chunks_head/` and `wal/` to the archive when blocks match.
    pub include_head: bool,
    /// gzip level, 0-9.
    pub compression_level: u32,
    /// Chunks buffered between producer and consumer; 0 is a rendezvous.
    pub pipe_depth: usize,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            include_head: true,
            compression_level: Compression::default().level(),
            pipe_depth: 0,
        }
    }
}

#[derive(Debug)]
pub enum ArchiveOutcome {
    NoData { bytes_written: u64 },
    Archived { bytes_written: u64, stats: ArchiveStats },
}

impl ArchiveOutcome {
    pub fn bytes_written(&self) -> u64 {
        match self {
            ArchiveOutcome::NoData { bytes_written } => *bytes_written,
            ArchiveOutcome::Archived { bytes_written, .. } => *bytes_written,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, ArchiveOutcome::NoData { .. })
    }

    pub fn stats(&self) -> Option<&ArchiveStats> {
        match self {
            ArchiveOutcome::NoData { .. } => None,
            ArchiveOutcome::Archived { stats, .. } => Some(stats),
        }
    }
}

pub struct Archiver {
    layout: TsdbLayout,
    config: ArchiverConfig,
    clock: Arc<dyn Clock>,
}

impl Archiver {
    pub fn new(data_root: impl Into<PathBuf>, config: ArchiverConfig) -> Self {
        Self {
            layout: TsdbLayout::new(data_root),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Writes the archive of `blocks` to `out`. Entries that cannot be read
    /// are skipped and reported in the stats; a failure of the encoder, the
    /// pipe or `out` aborts the run.
    pub fn stream<W: Write + ?Sized>(&self, blocks: &[Block], out: &mut W) -> Result<ArchiveOutcome> {
        if blocks.is_empty() {
            info!("no blocks selected, writing no-data marker");
            out.write_all(NO_DATA_MARKER.as_bytes())?;
            out.flush()?;
            return Ok(ArchiveOutcome::NoData {
                bytes_written: NO_DATA_MARKER.len() as u64,
            });
        }

        let roots = self.walk_roots(blocks);
        info!(
            "archiving {} blocks from {}",
            blocks.len(),
            self.layout.root().display()
        );

        let (writer, mut reader) = pipe(self.config.pipe_depth);
        let (produced, copied) = thread::scope(|scope| {
            let producer = scope.spawn(move || self.produce(&roots, writer));
            let copied = io::copy(&mut reader, out);
            // Unblocks the producer if the sink failed mid-stream.
            drop(reader);
            let produced = producer.join().unwrap_or_else(|_| {
                Err(Error::Archive(io::Error::new(
                    io::ErrorKind::Other,
                    "archive producer panicked",
                )))
            });
            (produced, copied)
        });

        let (stats, bytes_written) = match (produced, copied) {
            (Ok(stats), Ok(bytes_written)) => (stats, bytes_written),
            // The producer only saw the reader go away; the sink error is the cause.
            (Err(Error::Archive(err)), Err(sink)) if err.kind() == io::ErrorKind::BrokenPipe => {
                warn!("archive sink failed: {}", sink);
                return Err(Error::Io(sink));
            }
            (Err(err), _) => return Err(err),
            (Ok(_), Err(sink)) => {
                warn!("archive sink failed: {}", sink);
                return Err(Error::Io(sink));
            }
        };
        out.flush()?;

        info!("archive complete: {} bytes, {}", bytes_written, stats.summary());
        if stats.has_skips() {
            warn!("{} entries were skipped while archiving", stats.skipped.len());
        }
        Ok(ArchiveOutcome::Archived {
            bytes_written,
            stats,
        })
    }

    fn walk_roots(&self, blocks: &[Block]) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(blocks.len() + 2);
        if self.config.include_head {
            for dir in self.layout.head_dirs() {
                if dir.is_dir() {
                    roots.push(dir);
                } else {
                    debug!("head directory {} not present", dir.display());
                }
            }
        }
        roots.extend(blocks.iter().map(|block| block.path.clone()));
        roots
    }

    fn produce(&self, roots: &[PathBuf], writer: PipeWriter) -> Result<ArchiveStats> {
        let started = Instant::now();
        let abort = writer.abort_handle();
        let now = self.clock.now();

        let encoder = GzBuilder::new()
            .filename(archive_file_name(now))
            .mtime(gzip_mtime(now))
            .operating_system(GZIP_OS_UNKNOWN)
            .write(writer, Compression::new(self.config.compression_level.min(9)));
        let mut builder = tar::Builder::new(encoder);
        let mut stats = ArchiveStats::new();

        let written = roots
            .iter()
            .try_for_each(|root| self.append_tree(&mut builder, root, &mut stats))
            .and_then(|()| builder.into_inner())
            .and_then(|encoder| encoder.finish());

        match written {
            Ok(writer) => {
                drop(abort);
                writer.close();
                stats.duration = started.elapsed();
                Ok(stats)
            }
            Err(err) => {
                warn!("archive stream failed: {}", err);
                abort.abort(io::Error::new(err.kind(), err.to_string()));
                Err(Error::Archive(err))
            }
        }
    }

    fn append_tree<W: Write>(
        &self,
        builder: &mut tar::Builder<W>,
        root: &Path,
        stats: &mut ArchiveStats,
    ) -> io::Result<()> {
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).to_path_buf();
                    warn!("skipping {}: {}", path.display(), err);
                    stats.record_skip(&path, err.to_string());
                    continue;
                }
            };
            let path = entry.path();
            let Ok(name) = path.strip_prefix(self.layout.root()) else {
                warn!("skipping {}: outside the data directory", path.display());
                stats.record_skip(path, "outside the data directory");
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("skipping {}: {}", path.display(), err);
                    stats.record_skip(path, err.to_string());
                    continue;
                }
            };

            let mut header = tar::Header::new_gnu();
            header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, name, io::empty())?;
                stats.record_dir();
            } else if file_type.is_symlink() {
                let target = match fs::read_link(path) {
                    Ok(target) => target,
                    Err(err) => {
                        warn!("skipping {}: {}", path.display(), err);
                        stats.record_skip(path, err.to_string());
                        continue;
                    }
                };
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, name, &target)?;
                stats.record_symlink();
            } else if file_type.is_file() {
                let data = match fs::read(path) {
                    Ok(data) => data,
                    Err(err) => {
                        warn!("skipping {}: {}", path.display(), err);
                        stats.record_skip(path, err.to_string());
                        continue;
                    }
                };
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, data.as_slice())?;
                stats.record_file(data.len() as u64);
            } else {
                debug!("skipping {}: unsupported file type", path.display());
                stats.record_skip(path, "unsupported file type");
            }
        }
        Ok(())
    }
}

/// Name recorded in the gzip header.
pub fn archive_file_name(now: Timestamp) -> String {
    format!("blockdump-{}.tar.gz", now.as_nanos().div_euclid(1_000_000_000))
}

fn gzip_mtime(now: Timestamp) -> u32 {
    u32::try_from(now.as_nanos().div_euclid(1_000_000_000)).unwrap_or(0)
}
