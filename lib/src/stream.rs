//! Lazy concatenation of byte sources.
//!
//! [`ConcatReader`] reads one source to exhaustion and then the next.
//! [`ChunkedReader`] does the same for an iterator of sources, which is how a
//! binary's chunk rows become one stream. It behaves exactly like the right
//! fold `concat(c0, concat(c1, concat(c2, ...)))` but walks the sources
//! iteratively, so call depth stays flat however many chunks there are, and a
//! source is only pulled from the iterator once the stream reaches it.
//!
//! Both readers push `skip` down to the active source first. In-memory chunk
//! buffers skip in O(1) instead of copying the skipped bytes out.

use crate::errors::{Error, Result};
use log::trace;
use std::io::{self, Cursor, Read};

/// A readable source that may be able to skip forward without reading.
pub trait ByteSource: Read {
    /// Skips up to `n` bytes without reading them, if the source can.
    /// Returns how many were skipped; the default skips nothing.
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        let _ = n;
        Ok(0)
    }
}

impl<T: AsRef<[u8]>> ByteSource for Cursor<T> {
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        let len = self.get_ref().as_ref().len() as u64;
        let pos = self.position().min(len);
        let skipped = n.min(len - pos);
        self.set_position(pos + skipped);
        Ok(skipped)
    }
}

impl ByteSource for &[u8] {
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        let skipped = n.min(self.len() as u64) as usize;
        *self = &self[skipped..];
        Ok(skipped as u64)
    }
}

impl ByteSource for io::Empty {}

impl<R: Read> ByteSource for io::BufReader<R> {}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip_direct(n)
    }
}

/// Skips `n` bytes of `source`: directly where possible, then by reading and
/// discarding the rest. Returns fewer than `n` only if the source ran out.
pub fn skip_source<S: ByteSource + ?Sized>(source: &mut S, n: u64) -> io::Result<u64> {
    let mut skipped = source.skip_direct(n)?;
    if skipped < n {
        let mut remainder = (&mut *source).take(n - skipped);
        skipped += io::copy(&mut remainder, &mut io::sink())?;
    }
    Ok(skipped)
}

fn check_range(buf: &[u8], offset: usize, length: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= buf.len() => Ok(()),
        _ => Err(Error::bounds(format!(
            "offset {} + length {} exceeds buffer of {} bytes",
            offset,
            length,
            buf.len()
        ))),
    }
}

/// Reads `first` to exhaustion, then `second`.
///
/// A source is dropped (closed) the moment it is exhausted; dropping or
/// [closing](ConcatReader::close) the composite closes whatever is left.
#[derive(Debug)]
pub struct ConcatReader<A, B> {
    first: Option<A>,
    second: Option<B>,
}

pub fn concat<A: ByteSource, B: ByteSource>(first: A, second: B) -> ConcatReader<A, B> {
    ConcatReader::new(first, second)
}

impl<A: ByteSource, B: ByteSource> ConcatReader<A, B> {
    pub fn new(first: A, second: B) -> Self {
        ConcatReader {
            first: Some(first),
            second: Some(second),
        }
    }

    fn next_source(&mut self) {
        if self.first.take().is_none() {
            self.second = None;
        }
    }

    fn active(&mut self) -> Option<&mut dyn Read> {
        match (&mut self.first, &mut self.second) {
            (Some(a), _) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Reads one byte; `None` once both sources are exhausted.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            let Some(source) = self.active() else {
                return Ok(None);
            };
            match source.read(&mut byte)? {
                0 => self.next_source(),
                _ => return Ok(Some(byte[0])),
            }
        }
    }

    /// Reads into `buf[offset..offset + length]` whatever the active source
    /// has ready. A source that yields nothing is treated as exhausted and the
    /// read moves on, so `Some(0)` is only returned for `length == 0`.
    /// Returns `None` once both sources are exhausted.
    pub fn read_into(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<usize>> {
        check_range(buf, offset, length)?;
        if length == 0 {
            return Ok(Some(0));
        }
        let window = &mut buf[offset..offset + length];
        loop {
            let Some(source) = self.active() else {
                return Ok(None);
            };
            match source.read(window).map_err(Error::from_io)? {
                0 => self.next_source(),
                n => return Ok(Some(n)),
            }
        }
    }

    /// Skips up to `n` bytes, crossing into the second source if the first
    /// runs out. Returns the number actually skipped.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut remaining = n;
        while remaining > 0 {
            let skipped = match (&mut self.first, &mut self.second) {
                (Some(a), _) => skip_source(a, remaining)?,
                (None, Some(b)) => skip_source(b, remaining)?,
                (None, None) => break,
            };
            remaining -= skipped;
            if remaining > 0 {
                self.next_source();
            }
        }
        Ok(n - remaining)
    }

    /// Closes the active source and any source not yet reached.
    pub fn close(&mut self) {
        self.first = None;
        self.second = None;
    }
}

impl<A: ByteSource, B: ByteSource> Read for ConcatReader<A, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_into(buf, 0, len)?.unwrap_or(0))
    }
}

impl<A: ByteSource, B: ByteSource> ByteSource for ConcatReader<A, B> {
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        self.skip(n)
    }
}

/// Lazily concatenates the sources yielded by an iterator. An `Err` from the
/// iterator is returned from the read that reaches it.
#[derive(Debug)]
pub struct ChunkedReader<I, S> {
    sources: Option<I>,
    current: Option<S>,
    position: u64,
}

pub fn concat_all<I, S>(sources: I) -> ChunkedReader<I::IntoIter, S>
where
    I: IntoIterator<Item = io::Result<S>>,
    S: ByteSource,
{
    ChunkedReader::new(sources.into_iter())
}

impl<I, S> ChunkedReader<I, S>
where
    I: Iterator<Item = io::Result<S>>,
    S: ByteSource,
{
    pub fn new(sources: I) -> Self {
        ChunkedReader {
            sources: Some(sources),
            current: None,
            position: 0,
        }
    }

    /// Bytes consumed so far, by reading or skipping.
    pub fn position(&self) -> u64 {
        self.position
    }

    // Makes sure a source is active, pulling the next one if needed.
    // Returns false at end of data.
    fn ensure_current(&mut self) -> io::Result<bool> {
        if self.current.is_some() {
            return Ok(true);
        }
        let Some(sources) = self.sources.as_mut() else {
            return Ok(false);
        };
        match sources.next() {
            Some(Ok(source)) => {
                self.current = Some(source);
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => {
                trace!("all sources exhausted after {} bytes", self.position);
                self.sources = None;
                Ok(false)
            }
        }
    }

    fn next_source(&mut self) {
        self.current = None;
    }

    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        while self.ensure_current()? {
            if let Some(source) = self.current.as_mut() {
                if source.read(&mut byte)? == 1 {
                    self.position += 1;
                    return Ok(Some(byte[0]));
                }
            }
            self.next_source();
        }
        Ok(None)
    }

    /// Same contract as [`ConcatReader::read_into`].
    pub fn read_into(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<usize>> {
        check_range(buf, offset, length)?;
        if length == 0 {
            return Ok(Some(0));
        }
        let window = &mut buf[offset..offset + length];
        while self.ensure_current().map_err(Error::from_io)? {
            if let Some(source) = self.current.as_mut() {
                let n = source.read(window).map_err(Error::from_io)?;
                if n > 0 {
                    self.position += n as u64;
                    return Ok(Some(n));
                }
            }
            self.next_source();
        }
        Ok(None)
    }

    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut remaining = n;
        while remaining > 0 && self.ensure_current()? {
            if let Some(source) = self.current.as_mut() {
                let skipped = skip_source(source, remaining)?;
                remaining -= skipped;
                self.position += skipped;
            }
            if remaining > 0 {
                self.next_source();
            }
        }
        Ok(n - remaining)
    }

    /// Closes the active source and drops the sources not yet reached
    /// without pulling them.
    pub fn close(&mut self) {
        self.current = None;
        self.sources = None;
    }
}

impl<I, S> Read for ChunkedReader<I, S>
where
    I: Iterator<Item = io::Result<S>>,
    S: ByteSource,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        Ok(self.read_into(buf, 0, len)?.unwrap_or(0))
    }
}

impl<I, S> ByteSource for ChunkedReader<I, S>
where
    I: Iterator<Item = io::Result<S>>,
    S: ByteSource,
{
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        self.skip(n)
    }
}
