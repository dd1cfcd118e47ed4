//! A single-writer, single-reader byte pipe between threads.
//!
//! Chunks travel over a bounded `sync_channel`, so the writer blocks while
//! the reader is behind and the reader blocks until a chunk is ready. At
//! most `depth + 1` chunks are in flight at any time.

use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

type Chunk = io::Result<Vec<u8>>;

pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(depth);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
            done: false,
        },
    )
}

pub struct PipeWriter {
    tx: SyncSender<Chunk>,
}

impl PipeWriter {
    /// A handle that can end the stream with an error even after the writer
    /// has been moved into an encoder.
    pub fn abort_handle(&self) -> PipeAbort {
        PipeAbort {
            tx: self.tx.clone(),
        }
    }

    pub fn close(self) {}
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeAbort {
    tx: SyncSender<Chunk>,
}

impl PipeAbort {
    /// Delivers `err` to the reader, which reports it instead of end-of-stream.
    pub fn abort(self, err: io::Error) {
        let _ = self.tx.send(Err(err));
    }
}

pub struct PipeReader {
    rx: Receiver<Chunk>,
    chunk: Vec<u8>,
    pos: usize,
    done: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.chunk.len() {
                let n = buf.len().min(self.chunk.len() - self.pos);
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Err(err)) => {
                    self.done = true;
                    return Err(err);
                }
                // Every sender is gone: end of stream.
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}
