//! Splits a byte source into fixed-size chunks for storage.

use crate::errors::{Error, Result};
use std::io::{self, Read};

// Buffer reserved before a chunk's bytes arrive.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// One stored slice of a binary. Every chunk but the last holds exactly the
/// configured maximum number of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCodec {
    max_chunk_size: usize,
}

impl ChunkCodec {
    pub fn new(max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(Error::bounds("chunk size must be at least 1 byte"));
        }
        Ok(ChunkCodec { max_chunk_size })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Number of chunks a payload of `len` bytes is split into.
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.max_chunk_size as u64)
    }

    /// Lazily splits `reader`; each chunk is read only when pulled.
    pub fn split<R: Read>(&self, reader: R) -> Chunks<R> {
        Chunks {
            reader,
            max_chunk_size: self.max_chunk_size,
            next_index: 0,
            done: false,
        }
    }
}

/// Iterator over the chunks of a byte source. See [`ChunkCodec::split`].
#[derive(Debug)]
pub struct Chunks<R> {
    reader: R,
    max_chunk_size: usize,
    next_index: u32,
    done: bool,
}

impl<R: Read> Chunks<R> {
    // Fills up to one chunk; short reads from the source do not end a chunk early.
    // The buffer grows with the data, so a huge limit costs nothing up front.
    fn fill(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.max_chunk_size.min(INITIAL_CAPACITY));
        let limit = u64::try_from(self.max_chunk_size).unwrap_or(u64::MAX);
        (&mut self.reader).take(limit).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let bytes = match self.fill() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.done = true;
                return Some(Err(Error::from_io(e)));
            }
        };
        if bytes.len() < self.max_chunk_size {
            self.done = true;
        }
        if bytes.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index = match self.next_index.checked_add(1) {
            Some(next) => next,
            None => {
                self.done = true;
                return Some(Err(Error::bounds("binary needs more than u32::MAX chunks")));
            }
        };
        Some(Ok(Chunk { index, bytes }))
    }
}
