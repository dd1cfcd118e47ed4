//! Time bounds of the still-open head partition.
//!
//! The head has no `meta.json`. Its bounds come from the headers of the
//! memory-mapped head chunk files; chunk payloads are skipped, never decoded.
//!
//! Only chunks already cut to `chunks_head/` are seen. Samples in a series'
//! open in-memory chunk live in the WAL alone, which is not replayed, so the
//! reported maximum can trail the newest sample by up to one chunk range.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::Result;
use crate::layout::{is_head_chunk_file, TsdbLayout};
use crate::mmap::MmapFile;
use crate::time::Timestamp;

pub const HEAD_CHUNK_MAGIC: u32 = 0x0130_BC91;
pub const HEAD_CHUNK_VERSION: u8 = 1;
pub const HEAD_CHUNK_FILE_HEADER_SIZE: usize = 8;

// series ref (8) + mint (8) + maxt (8) + encoding (1)
const CHUNK_META_SIZE: usize = 25;
const CHUNK_CRC_SIZE: usize = 4;
// Encoding 0 never appears in a written chunk; zeroed tail space reads as it.
const ENCODING_NONE: u8 = 0;

/// Head bounds over the cut chunks in `chunks_head/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadSummary {
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    /// Not persisted for the head; always zero.
    pub series_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min_time: Timestamp,
    pub max_time: Timestamp,
    pub chunks: u64,
}

impl ChunkBounds {
    fn merge(self, other: ChunkBounds) -> ChunkBounds {
        ChunkBounds {
            min_time: self.min_time.min(other.min_time),
            max_time: self.max_time.max(other.max_time),
            chunks: self.chunks + other.chunks,
        }
    }
}

/// Scans every head chunk file. Files that fail to open or carry a bad
/// header are skipped with a warning.
pub fn read_head(layout: &TsdbLayout) -> Result<Option<HeadSummary>> {
    let dir = layout.chunks_head_dir();
    if !dir.is_dir() {
        debug!("no head chunks directory at {}", dir.display());
        return Ok(None);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_head_chunk_file(name) && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut bounds: Option<ChunkBounds> = None;
    for path in files {
        match scan_chunk_file(&path) {
            Ok(Some(found)) => {
                bounds = Some(match bounds {
                    Some(current) => current.merge(found),
                    None => found,
                });
            }
            Ok(None) => {}
            Err(err) => warn!("skipping head chunk file {}: {}", path.display(), err),
        }
    }

    Ok(bounds.map(|bounds| {
        debug!(
            "head spans {} chunks between {} and {}",
            bounds.chunks, bounds.min_time, bounds.max_time
        );
        HeadSummary {
            min_time: bounds.min_time,
            max_time: bounds.max_time,
            series_count: 0,
        }
    }))
}

pub fn scan_chunk_file(path: &Path) -> Result<Option<ChunkBounds>> {
    let mmap = MmapFile::open(path)?;
    scan_chunks(mmap.as_slice())
}

/// Walks the chunk records in `data`, stopping at the first zeroed or
/// truncated record (the writer may still be appending).
pub fn scan_chunks(data: &[u8]) -> Result<Option<ChunkBounds>> {
    if data.len() < HEAD_CHUNK_FILE_HEADER_SIZE {
        return Err(invalid("head chunk file shorter than its header"));
    }
    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if magic != HEAD_CHUNK_MAGIC {
        return Err(invalid("head chunk magic mismatch"));
    }
    if data[4] != HEAD_CHUNK_VERSION {
        return Err(invalid("unsupported head chunk version"));
    }

    let mut offset = HEAD_CHUNK_FILE_HEADER_SIZE;
    let mut bounds: Option<ChunkBounds> = None;

    while offset + CHUNK_META_SIZE < data.len() {
        let meta = &data[offset..offset + CHUNK_META_SIZE];
        let min_ms = be_i64(&meta[8..16]);
        let max_ms = be_i64(&meta[16..24]);
        let encoding = meta[24];
        if encoding == ENCODING_NONE {
            break;
        }

        let Some((data_len, varint_len)) = read_uvarint(&data[offset + CHUNK_META_SIZE..]) else {
            break;
        };
        let Ok(data_len) = usize::try_from(data_len) else {
            break;
        };
        let record_len = CHUNK_META_SIZE
            .saturating_add(varint_len)
            .saturating_add(data_len)
            .saturating_add(CHUNK_CRC_SIZE);
        if offset.saturating_add(record_len) > data.len() {
            break;
        }

        let found = ChunkBounds {
            min_time: Timestamp::from_millis(min_ms),
            max_time: Timestamp::from_millis(max_ms),
            chunks: 1,
        };
        bounds = Some(match bounds {
            Some(current) => current.merge(found),
            None => found,
        });
        offset += record_len;
    }

    Ok(bounds)
}

fn be_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_be_bytes(buf)
}

fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (idx, byte) in buf.iter().take(10).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * idx);
        if byte & 0x80 == 0 {
            return Some((value, idx + 1));
        }
    }
    None
}

fn invalid(msg: &str) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        msg.to_string(),
    ))
}

/// Encodes a head chunk file; used by tests to build fixtures.
#[doc(hidden)]
pub fn encode_chunk_file(chunks: &[(u64, i64, i64, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&HEAD_CHUNK_MAGIC.to_be_bytes());
    out.push(HEAD_CHUNK_VERSION);
    out.extend_from_slice(&[0u8; 3]);
    for (series_ref, min_ms, max_ms, payload) in chunks {
        out.extend_from_slice(&series_ref.to_be_bytes());
        out.extend_from_slice(&min_ms.to_be_bytes());
        out.extend_from_slice(&max_ms.to_be_bytes());
        out.push(1);
        let mut len = payload.len() as u64;
        loop {
            let byte = (len & 0x7f) as u8;
            len >>= 7;
            if len == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0u8; CHUNK_CRC_SIZE]);
    }
    out
}
