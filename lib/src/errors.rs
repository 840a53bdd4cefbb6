//! Error type shared by the binary and quad paths.
//!
//! Byte streams speak `std::io`, so errors raised while a stream is being
//! consumed travel inside an [`std::io::Error`]. [`Error::from_io`] recovers
//! the wrapped variant on the other side.

use std::io;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The store rejected, timed out, or failed a query. Never retried here.
    #[error("query failed: {0}")]
    Query(String),

    /// A stored value could not be decoded to the type its column promises.
    #[error("could not decode {what}: {message}")]
    Encoding { what: &'static str, message: String },

    /// A caller-supplied range or size is invalid.
    #[error("out of bounds: {0}")]
    Bounds(String),

    /// A chunked write failed after some chunks were already persisted.
    /// Nothing is rolled back.
    #[error("write of {identifier} failed after {written} chunk(s) were persisted: {source}")]
    PartialWrite {
        identifier: String,
        written: u32,
        #[source]
        source: Box<Error>,
    },

    /// The caller's byte source failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn query(msg: impl Into<String>) -> Self {
        Error::Query(msg.into())
    }

    pub fn encoding(what: &'static str, msg: impl Into<String>) -> Self {
        Error::Encoding {
            what,
            message: msg.into(),
        }
    }

    pub fn bounds(msg: impl Into<String>) -> Self {
        Error::Bounds(msg.into())
    }

    /// Unwraps an [`io::Error`] produced by one of our streams back into the
    /// error that caused it. Foreign I/O errors become [`Error::Io`].
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            _ => Error::Io(io::Error::other("stream error lost its cause")),
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::Bounds(_) => io::ErrorKind::InvalidInput,
            Error::Encoding { .. } => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
