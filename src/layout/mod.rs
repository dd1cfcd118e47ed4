use std::fmt;
use std::path::{Path, PathBuf};

pub const BLOCK_META_FILE: &str = "meta.json";
pub const CHUNKS_HEAD_DIR: &str = "chunks_head";
pub const WAL_DIR: &str = "wal";

const ULID_LEN: usize = 26;
// Crockford base32: no I, L, O or U.
const ULID_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    InvalidBlockId { value: String },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::InvalidBlockId { value } => {
                write!(f, "invalid block id (expected 26-char ULID): {value}")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

type Result<T> = std::result::Result<T, LayoutError>;

/// Naming convention of a TSDB data directory:
///
/// ```text
/// <root>/
///   01F2BHZ6Y5B1Q4V1X4R9MZ7J0K/   persisted block (ULID)
///     meta.json
///     index
///     chunks/000001
///   chunks_head/000001            memory-mapped head chunks
///   wal/00000037                  write-ahead log segments
/// ```
#[derive(Debug, Clone)]
pub struct TsdbLayout {
    root: PathBuf,
}

impl TsdbLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fails for names that do not follow the block naming convention.
    pub fn block_dir(&self, block_id: &str) -> Result<PathBuf> {
        validate_block_id(block_id)?;
        Ok(self.root.join(block_id))
    }

    pub fn chunks_head_dir(&self) -> PathBuf {
        self.root.join(CHUNKS_HEAD_DIR)
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.root.join(WAL_DIR)
    }

    /// Directories backing the still-open head partition.
    pub fn head_dirs(&self) -> [PathBuf; 2] {
        [self.chunks_head_dir(), self.wal_dir()]
    }
}

/// Head chunk files are named by a zero-padded sequence number.
pub fn is_head_chunk_file(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn validate_block_id(value: &str) -> Result<()> {
    let valid = value.len() == ULID_LEN
        && value
            .bytes()
            .all(|b| ULID_ALPHABET.contains(&b.to_ascii_uppercase()))
        // The first character only carries 3 bits of timestamp.
        && value.as_bytes()[0] <= b'7';
    if !valid {
        return Err(LayoutError::InvalidBlockId {
            value: value.to_string(),
        });
    }
    Ok(())
}
