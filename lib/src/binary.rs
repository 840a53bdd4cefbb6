//! Chunked binary storage.
//!
//! A binary is written as one `binarydata` row per chunk and read back with a
//! single ordered query whose rows are folded, lazily, into one byte stream.

use crate::chunk::ChunkCodec;
use crate::codec::{decode_int, take_blob};
use crate::config::Config;
use crate::consistency::{ConsistencyPolicy, OperationClass};
use crate::errors::{Error, Result};
use crate::session::{Query, Row, Rows, Session, Statement};
use crate::stream::{ByteSource, ChunkedReader};
use log::{debug, trace, warn};
use oxigraph::model::NamedNode;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

/// What a successful [`BinaryStore::write`] persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub chunks: u32,
    pub bytes: u64,
}

pub struct BinaryStore<S> {
    session: Arc<S>,
    policy: ConsistencyPolicy,
    max_chunk_size: usize,
}

impl<S> Clone for BinaryStore<S> {
    fn clone(&self) -> Self {
        BinaryStore {
            session: Arc::clone(&self.session),
            policy: self.policy,
            max_chunk_size: self.max_chunk_size,
        }
    }
}

// Drains a write's result rows so that late errors are not lost.
fn drain(rows: Rows) -> Result<()> {
    for row in rows {
        row?;
    }
    Ok(())
}

impl<S: Session> BinaryStore<S> {
    pub fn new(session: Arc<S>, config: &Config) -> Self {
        BinaryStore {
            session,
            policy: config.consistency,
            max_chunk_size: config.max_chunk_size,
        }
    }

    /// Splits `reader` into chunks of at most `max_chunk_size` bytes and
    /// writes each as its own row.
    ///
    /// Any content already stored under `identifier` is removed first, so a
    /// shorter payload never reads back with a stale tail. Rows already
    /// written stay written if a later chunk fails; that case is reported as
    /// [`Error::PartialWrite`] and retrying the whole write is safe.
    pub fn write<R: Read>(
        &self,
        identifier: &NamedNode,
        reader: R,
        max_chunk_size: usize,
    ) -> Result<WriteSummary> {
        let codec = ChunkCodec::new(max_chunk_size)?;
        let consistency = self.policy.level(OperationClass::BinaryWrite);
        let mut summary = WriteSummary::default();

        let clear = Statement::new(Query::DeleteChunks, consistency).bind(identifier);
        drain(self.session.execute(&clear)?)?;

        for chunk in codec.split(reader) {
            let persisted = chunk.and_then(|chunk| {
                let index = i32::try_from(chunk.index).map_err(|_| {
                    Error::bounds(format!("chunk index {} exceeds the int column", chunk.index))
                })?;
                let len = chunk.bytes.len() as u64;
                let statement = Statement::new(Query::InsertChunk, consistency)
                    .bind(identifier)
                    .bind(index)
                    .bind(chunk.bytes);
                drain(self.session.execute(&statement)?)?;
                trace!("wrote chunk {} of {} ({} bytes)", index, identifier, len);
                Ok(len)
            });
            match persisted {
                Ok(len) => {
                    summary.chunks += 1;
                    summary.bytes += len;
                }
                Err(e) if summary.chunks == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        "write of {} failed after {} chunk(s): {}",
                        identifier, summary.chunks, e
                    );
                    return Err(Error::PartialWrite {
                        identifier: identifier.as_str().to_string(),
                        written: summary.chunks,
                        source: Box::new(e),
                    });
                }
            }
        }
        debug!(
            "Stored {} as {} chunk(s), {} bytes",
            identifier, summary.chunks, summary.bytes
        );
        Ok(summary)
    }

    /// [`BinaryStore::write`] with the configured maximum chunk size.
    pub fn write_default<R: Read>(
        &self,
        identifier: &NamedNode,
        reader: R,
    ) -> Result<WriteSummary> {
        self.write(identifier, reader, self.max_chunk_size)
    }

    /// Opens the content of a binary as a single stream. An unknown
    /// identifier reads as empty content.
    pub fn read(&self, identifier: &NamedNode) -> Result<BinaryStream> {
        let consistency = self.policy.level(OperationClass::BinaryRead);
        let statement = Statement::new(Query::ReadChunks, consistency).bind(identifier);
        let rows = self.session.execute(&statement)?;
        debug!("Reading {} at {}", identifier, consistency);
        Ok(BinaryStream {
            inner: ChunkedReader::new(ChunkSources {
                identifier: identifier.clone(),
                rows,
                expected: 0,
                halted: None,
            }),
        })
    }

    /// Bytes `from..=to` of a binary. A range past the end is cut short.
    pub fn read_range(
        &self,
        identifier: &NamedNode,
        from: u64,
        to: u64,
    ) -> Result<io::Take<BinaryStream>> {
        if from > to {
            return Err(Error::bounds(format!(
                "range start {} is after range end {}",
                from, to
            )));
        }
        let mut stream = self.read(identifier)?;
        let skipped = stream.skip(from).map_err(Error::from_io)?;
        if skipped < from {
            trace!("{} ends before offset {}", identifier, from);
        }
        Ok(stream.take((to - from).saturating_add(1)))
    }

    /// Removes every chunk row of a binary.
    pub fn delete(&self, identifier: &NamedNode) -> Result<()> {
        let consistency = self.policy.level(OperationClass::BinaryWrite);
        let statement = Statement::new(Query::DeleteChunks, consistency).bind(identifier);
        drain(self.session.execute(&statement)?)?;
        debug!("Deleted chunks of {}", identifier);
        Ok(())
    }
}

// Rebuilds an error so that a halted stream can keep reporting it.
fn repeat(err: &Error) -> Error {
    match err {
        Error::Query(m) => Error::Query(m.clone()),
        Error::Encoding { what, message } => Error::encoding(*what, message.clone()),
        Error::Bounds(m) => Error::Bounds(m.clone()),
        Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
        other => Error::query(other.to_string()),
    }
}

/// Turns chunk rows into in-memory sources, checking that indices run
/// 0, 1, 2, ... without gaps. Once a row fails, every later pull fails the
/// same way so the stream never ends early.
struct ChunkSources {
    identifier: NamedNode,
    rows: Rows,
    expected: i64,
    halted: Option<Error>,
}

impl ChunkSources {
    fn project(&mut self, mut row: Row) -> Result<Cursor<Vec<u8>>> {
        let index = i64::from(decode_int(&row, "chunkIndex")?);
        if index != self.expected {
            return Err(Error::encoding(
                "chunkIndex",
                format!(
                    "{} is missing chunk {} (next stored chunk is {})",
                    self.identifier, self.expected, index
                ),
            ));
        }
        self.expected += 1;
        take_blob(&mut row, "chunk")
    }

    fn halt(&mut self, err: Error) -> io::Error {
        let out = io::Error::from(repeat(&err));
        self.halted = Some(err);
        out
    }
}

impl Iterator for ChunkSources {
    type Item = io::Result<Cursor<Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = &self.halted {
            return Some(Err(io::Error::from(repeat(err))));
        }
        let projected = match self.rows.next()? {
            Ok(row) => self.project(row),
            Err(e) => Err(e),
        };
        Some(projected.map_err(|e| self.halt(e)))
    }
}

/// The content of one binary, read chunk by chunk as it is consumed.
pub struct BinaryStream {
    inner: ChunkedReader<ChunkSources, Cursor<Vec<u8>>>,
}

impl BinaryStream {
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.inner.read_byte()
    }

    /// See [`crate::stream::ConcatReader::read_into`].
    pub fn read_into(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<Option<usize>> {
        self.inner.read_into(buf, offset, length)
    }

    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        self.inner.skip(n)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Releases the current chunk and stops fetching further rows.
    pub fn close(&mut self) {
        self.inner.close()
    }
}

impl Read for BinaryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ByteSource for BinaryStream {
    fn skip_direct(&mut self, n: u64) -> io::Result<u64> {
        self.inner.skip(n)
    }
}
