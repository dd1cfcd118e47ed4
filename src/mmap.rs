use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::error::Result;

/// A read-only mapping of a storage file. Empty files are represented
/// without a mapping since zero-length maps are rejected by the OS.
pub struct MmapFile {
    map: Option<Mmap>,
    len: usize,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Self { map: None, len });
        }
        // The storage engine only appends to head chunk files; bytes we map
        // are never rewritten in place.
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Self {
            map: Some(map),
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(map) => map,
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
