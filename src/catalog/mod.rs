//! Enumeration of the persisted blocks and the head of a data directory.
//!
//! Partitions are recognised by name only (see [`crate::layout`]). A
//! partition that cannot be read is logged and left out; a data directory
//! that cannot be read at all fails the whole enumeration.

mod block;
mod head;
mod summary;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layout::TsdbLayout;

pub use block::{Block, BlockCompaction, BlockMeta, BlockStats};
pub use head::{
    encode_chunk_file, read_head, scan_chunk_file, scan_chunks, ChunkBounds, HeadSummary,
    HEAD_CHUNK_MAGIC,
};
pub use summary::{CatalogSummary, HEAD_BOUNDS_NOTE, NO_HEAD_BLOCK, NO_PERSISTENT_BLOCKS};

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub head: Option<HeadSummary>,
    pub blocks: Vec<Block>,
}

impl Catalog {
    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary::new(self.head, &self.blocks)
    }
}

#[derive(Debug, Clone)]
pub struct BlockCatalog {
    layout: TsdbLayout,
}

impl BlockCatalog {
    /// Opens `data_root` read-only. Fails if it is not a readable directory.
    pub fn open(data_root: impl Into<PathBuf>) -> Result<Self> {
        let root = data_root.into();
        let meta = fs::metadata(&root).map_err(|err| Error::InvalidDataDir {
            path: root.clone(),
            reason: err.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(Error::InvalidDataDir {
                path: root,
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self {
            layout: TsdbLayout::new(root),
        })
    }

    pub fn data_root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &TsdbLayout {
        &self.layout
    }

    pub fn enumerate(&self) -> Result<Catalog> {
        info!("accessing tsdb at {}", self.layout.root().display());
        let head = read_head(&self.layout)?;
        let blocks = self.blocks()?;
        info!("closing tsdb, {} persistent blocks found", blocks.len());
        Ok(Catalog { head, blocks })
    }

    /// Persisted blocks ordered by min time.
    pub fn blocks(&self) -> Result<Vec<Block>> {
        let root = self.layout.root();
        let entries = fs::read_dir(root).map_err(|err| Error::InvalidDataDir {
            path: root.to_path_buf(),
            reason: err.to_string(),
        })?;

        let mut blocks = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(path) = self.layout.block_dir(name) else {
                continue;
            };
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => {}
                _ => continue,
            }

            match Block::open(&path) {
                Ok(block) => {
                    debug!(
                        "found block {} [{}, {}] samples={} series={}",
                        block.id,
                        block.min_time,
                        block.max_time,
                        block.sample_count,
                        block.series_count
                    );
                    blocks.push(block);
                }
                Err(err) => warn!("skipping block {}: {}", path.display(), err),
            }
        }

        blocks.sort_by(|a, b| a.min_time.cmp(&b.min_time).then_with(|| a.id.cmp(&b.id)));
        Ok(blocks)
    }
}
