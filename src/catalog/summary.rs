use std::io::Write;

use super::{Block, HeadSummary};
use crate::time::Timestamp;

pub const NO_HEAD_BLOCK: &str = "No head block found";
pub const NO_PERSISTENT_BLOCKS: &str = "No persistent blocks found";
/// Printed under the head rows: samples still in the open in-memory chunk are not counted.
pub const HEAD_BOUNDS_NOTE: &str = "(bounds cover chunks cut to chunks_head/ only)";

const KEY_WIDTH: usize = 24;

/// Aggregate statistics over the persisted blocks plus the head's bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    pub block_count: usize,
    pub total_samples: u64,
    pub total_series: u64,
    pub total_size_bytes: u64,
    pub earliest: Option<Timestamp>,
    pub latest: Option<Timestamp>,
    pub head: Option<HeadSummary>,
}

impl CatalogSummary {
    pub fn new(head: Option<HeadSummary>, blocks: &[Block]) -> Self {
        let mut summary = CatalogSummary {
            head,
            ..CatalogSummary::default()
        };
        for block in blocks {
            summary.block_count += 1;
            summary.total_samples = summary.total_samples.saturating_add(block.sample_count);
            summary.total_series = summary.total_series.saturating_add(block.series_count);
            summary.total_size_bytes = summary.total_size_bytes.saturating_add(block.size_bytes);
            summary.earliest = Some(match summary.earliest {
                Some(current) => current.min(block.min_time),
                None => block.min_time,
            });
            summary.latest = Some(match summary.latest {
                Some(current) => current.max(block.max_time),
                None => block.max_time,
            });
        }
        summary
    }

    /// Writes the fixed-width key/value report, head section first.
    pub fn write_report<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match &self.head {
            Some(head) => {
                writeln!(out, "Head Block Metadata")?;
                writeln!(out, "{}", "-".repeat(KEY_WIDTH + 4))?;
                write_row(out, "Minimum time (UTC)", head.min_time)?;
                write_row(out, "Maximum time (UTC)", head.max_time)?;
                write_row(out, "Number of series", head.series_count)?;
                writeln!(out, "{HEAD_BOUNDS_NOTE}")?;
            }
            None => writeln!(out, "{NO_HEAD_BLOCK}")?,
        }
        writeln!(out)?;

        let (Some(earliest), Some(latest)) = (self.earliest, self.latest) else {
            writeln!(out, "{NO_PERSISTENT_BLOCKS}")?;
            return Ok(());
        };
        writeln!(out, "Persistent Blocks Metadata")?;
        writeln!(out, "{}", "-".repeat(KEY_WIDTH + 4))?;
        write_row(out, "Minimum time (UTC)", earliest)?;
        write_row(out, "Maximum time (UTC)", latest)?;
        write_row(out, "Total number of blocks", self.block_count)?;
        write_row(out, "Total number of samples", self.total_samples)?;
        write_row(out, "Total number of series", self.total_series)?;
        write_row(out, "Total size", self.total_size_bytes)?;
        Ok(())
    }
}

fn write_row<W: Write>(out: &mut W, key: &str, value: impl std::fmt::Display) -> std::io::Result<()> {
    writeln!(out, "{key:<KEY_WIDTH$}| {value}")
}
