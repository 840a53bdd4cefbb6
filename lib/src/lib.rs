//! Maps resources onto the tables of a wide-column store.
//!
//! Binary content is stored as fixed-size chunk rows and read back as one
//! lazily pulled byte stream ([`BinaryStore`]). RDF statements are spread over
//! a mutable partition, an immutable partition and, for containers, a
//! containment index, and are reassembled on read ([`QuadAssembler`]).
//! Every query goes through an injected [`Session`].

extern crate derive_builder;

pub mod binary;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod consistency;
pub mod consts;
pub mod errors;
pub mod memory;
pub mod quads;
pub mod resource;
pub mod service;
pub mod session;
pub mod stream;
pub mod version;

pub use binary::{BinaryStore, BinaryStream, WriteSummary};
pub use chunk::{Chunk, ChunkCodec};
pub use config::Config;
pub use consistency::{ConsistencyLevel, ConsistencyPolicy, OperationClass};
pub use errors::{Error, Result};
pub use memory::MemorySession;
pub use quads::{QuadAssembler, QuadStream};
pub use resource::{BinaryMetadata, InteractionModel, ResourceRecord};
pub use service::{Resource, ResourceMetadata, ResourceService};
pub use session::{Query, Row, Rows, Session, Statement, Value};
pub use stream::{concat, concat_all, ByteSource, ChunkedReader, ConcatReader};
pub use version::{MonotonicTokens, VersionToken, VersionTokenGenerator};

/// Initializes logging for the widequad library.
///
/// If the `WIDEQUAD_LOG` environment variable is set, `RUST_LOG` is set to its
/// value, so `WIDEQUAD_LOG` takes precedence over `RUST_LOG`. The logger
/// itself (e.g. `env_logger::init()`) must be initialized after this call.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("WIDEQUAD_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
}
