use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::layout::BLOCK_META_FILE;
use crate::time::Timestamp;

/// `meta.json` written by the storage engine when a block is persisted.
/// Times are milliseconds; `maxTime` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub ulid: String,
    pub min_time: i64,
    pub max_time: i64,
    #[serde(default)]
    pub stats: BlockStats,
    #[serde(default)]
    pub compaction: BlockCompaction,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    #[serde(default)]
    pub num_samples: u64,
    #[serde(default)]
    pub num_series: u64,
    #[serde(default)]
    pub num_chunks: u64,
    #[serde(default)]
    pub num_tombstones: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCompaction {
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl BlockMeta {
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|err| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid {}: {err}", path.display()),
            ))
        })
    }
}

/// One persisted, immutable partition of the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub path: PathBuf,
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub size_bytes: u64,
    pub sample_count: u64,
    pub series_count: u64,
    pub chunk_count: u64,
    pub compaction_level: u32,
}

impl Block {
    /// Reads the block rooted at `dir` from its `meta.json`. Statistics are
    /// taken as recorded; nothing is recomputed from samples.
    pub fn open(dir: &Path) -> Result<Self> {
        let meta = BlockMeta::read(&dir.join(BLOCK_META_FILE))?;

        let dir_name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if !meta.ulid.eq_ignore_ascii_case(dir_name) {
            return Err(corrupt(format!(
                "block id {} does not match directory {dir_name}",
                meta.ulid
            )));
        }
        if meta.min_time > meta.max_time {
            return Err(corrupt(format!(
                "block {} has min time {} after max time {}",
                meta.ulid, meta.min_time, meta.max_time
            )));
        }

        Ok(Self {
            id: meta.ulid,
            path: dir.to_path_buf(),
            min_time: Timestamp::from_millis(meta.min_time),
            max_time: Timestamp::from_millis(meta.max_time),
            size_bytes: dir_size(dir),
            sample_count: meta.stats.num_samples,
            series_count: meta.stats.num_series,
            chunk_count: meta.stats.num_chunks,
            compaction_level: meta.compaction.level,
        })
    }
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn corrupt(msg: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01F2BHZ6Y5B1Q4V1X4R9MZ7J0K";

    fn write_meta(dir: &Path, json: &str) {
        fs::create_dir_all(dir).expect("mkdir");
        fs::write(dir.join(BLOCK_META_FILE), json).expect("write meta");
    }

    #[test]
    fn opens_block_and_converts_millis() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join(ID);
        write_meta(
            &dir,
            &format!(
                r#"{{"ulid":"{ID}","minTime":1000,"maxTime":2000,
                    "stats":{{"numSamples":10,"numSeries":3,"numChunks":4}},
                    "compaction":{{"level":1,"sources":["{ID}"]}},"version":1}}"#
            ),
        );
        fs::create_dir_all(dir.join("chunks")).expect("mkdir chunks");
        fs::write(dir.join("chunks").join("000001"), vec![0u8; 100]).expect("write chunk");

        let block = Block::open(&dir).expect("open block");
        assert_eq!(block.id, ID);
        assert_eq!(block.min_time, Timestamp::from_nanos(1_000_000_000));
        assert_eq!(block.max_time, Timestamp::from_nanos(2_000_000_000));
        assert_eq!(block.sample_count, 10);
        assert_eq!(block.series_count, 3);
        assert_eq!(block.chunk_count, 4);
        assert_eq!(block.compaction_level, 1);
        let meta_len = fs::metadata(dir.join(BLOCK_META_FILE)).expect("meta").len();
        assert_eq!(block.size_bytes, 100 + meta_len);
    }

    #[test]
    fn rejects_inverted_range() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join(ID);
        write_meta(
            &dir,
            &format!(r#"{{"ulid":"{ID}","minTime":2000,"maxTime":1000}}"#),
        );
        assert!(Block::open(&dir).is_err());
    }

    #[test]
    fn rejects_mismatched_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join(ID);
        write_meta(
            &dir,
            r#"{"ulid":"01F2BHZ6Y5B1Q4V1X4R9MZ7J0M","minTime":1,"maxTime":2}"#,
        );
        assert!(Block::open(&dir).is_err());
    }
}
