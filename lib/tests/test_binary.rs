use anyhow::Result;
use oxigraph::model::NamedNode;
use std::io::{self, Read};
use std::sync::Arc;
use widequad::config::Config;
use widequad::consistency::{ConsistencyLevel, ConsistencyPolicy};
use widequad::memory::MemorySession;
use widequad::session::Query;
use widequad::{BinaryStore, Error};

fn setup(config: &Config) -> (Arc<MemorySession>, BinaryStore<MemorySession>) {
    let session = Arc::new(MemorySession::new());
    let store = BinaryStore::new(Arc::clone(&session), config);
    (session, store)
}

fn binary(name: &str) -> NamedNode {
    NamedNode::new(format!("http://example.com/binaries/{}", name)).unwrap()
}

// deterministic bytes that do not repeat with any small period
fn payload(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn read_all(store: &BinaryStore<MemorySession>, id: &NamedNode) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    store.read(id)?.read_to_end(&mut out)?;
    Ok(out)
}

#[test]
fn content_survives_a_write_and_read() -> Result<()> {
    let (_session, store) = setup(&Config::default());
    let data = payload(10_000);
    for size in [1, 7, 512, 4096, 10_000, 20_000] {
        let id = binary(&format!("size-{}", size));
        let summary = store.write(&id, data.as_slice(), size)?;
        assert_eq!(summary.bytes, data.len() as u64);
        assert_eq!(read_all(&store, &id)?, data, "chunk size {}", size);
    }
    Ok(())
}

#[test]
fn chunk_size_far_above_payload_is_one_chunk() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("oversized");
    let summary = store.write(&id, &b"tiny"[..], usize::MAX)?;
    assert_eq!(summary.chunks, 1);
    assert_eq!(session.chunk_indices(id.as_str()), vec![0]);
    assert_eq!(read_all(&store, &id)?, b"tiny");
    Ok(())
}

#[test]
fn rewrite_with_shorter_content_drops_the_old_tail() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("rewritten");
    store.write(&id, &b"0123456789"[..], 2)?;
    assert_eq!(session.chunk_indices(id.as_str()), vec![0, 1, 2, 3, 4]);

    store.write(&id, &b"abc"[..], 2)?;
    assert_eq!(session.chunk_indices(id.as_str()), vec![0, 1]);
    assert_eq!(read_all(&store, &id)?, b"abc");

    // a larger chunk size on rewrite leaves no stale rows either
    let data = payload(100);
    store.write(&id, data.as_slice(), 7)?;
    store.write(&id, data.as_slice(), 64)?;
    assert_eq!(session.chunk_indices(id.as_str()), vec![0, 1]);
    assert_eq!(read_all(&store, &id)?, data);
    Ok(())
}

#[test]
fn rewrite_with_empty_content_reads_as_empty() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("emptied");
    store.write(&id, payload(40).as_slice(), 16)?;
    store.write(&id, io::empty(), 16)?;
    assert!(session.chunk_indices(id.as_str()).is_empty());
    assert!(read_all(&store, &id)?.is_empty());
    Ok(())
}

#[test]
fn rows_follow_the_chunk_layout() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("layout");
    let summary = store.write(&id, payload(2_500).as_slice(), 1_000)?;
    assert_eq!(summary.chunks, 3);
    assert_eq!(session.chunk_indices(id.as_str()), vec![0, 1, 2]);
    Ok(())
}

#[test]
fn default_write_uses_configured_chunk_size() -> Result<()> {
    let config = Config::builder().max_chunk_size(64usize).build()?;
    let (session, store) = setup(&config);
    let id = binary("configured");
    let summary = store.write_default(&id, payload(200).as_slice())?;
    assert_eq!(summary.chunks, 4);
    assert_eq!(session.chunk_indices(id.as_str()).len(), 4);
    Ok(())
}

#[test]
fn unknown_binary_reads_as_empty() -> Result<()> {
    let (_session, store) = setup(&Config::default());
    let mut stream = store.read(&binary("missing"))?;
    assert_eq!(stream.read_byte()?, None);
    let mut buf = [0u8; 8];
    assert_eq!(stream.read_into(&mut buf, 0, 8)?, None);
    Ok(())
}

#[test]
fn empty_payload_writes_no_rows() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("empty");
    let summary = store.write(&id, io::empty(), 16)?;
    assert_eq!(summary.chunks, 0);
    assert!(session.chunk_indices(id.as_str()).is_empty());
    assert!(read_all(&store, &id)?.is_empty());
    Ok(())
}

#[test]
fn skip_lands_on_every_offset() -> Result<()> {
    let (_session, store) = setup(&Config::default());
    let id = binary("skip");
    let data = payload(37);
    store.write(&id, data.as_slice(), 5)?;
    for n in 0..=data.len() + 3 {
        let mut stream = store.read(&id)?;
        let skipped = stream.skip(n as u64)?;
        assert_eq!(skipped, n.min(data.len()) as u64);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest)?;
        assert_eq!(rest, data[n.min(data.len())..], "skip {}", n);
    }
    Ok(())
}

#[test]
fn chunks_are_fetched_as_they_are_reached() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("lazy");
    store.write(&id, payload(100).as_slice(), 10)?;
    let mut stream = store.read(&id)?;
    assert_eq!(session.chunk_rows_fetched(), 0);
    stream.read_byte()?;
    assert_eq!(session.chunk_rows_fetched(), 1);
    stream.skip(25)?;
    assert_eq!(session.chunk_rows_fetched(), 3);
    stream.close();
    assert_eq!(stream.read_byte()?, None);
    assert_eq!(session.chunk_rows_fetched(), 3);
    Ok(())
}

#[test]
fn operations_use_their_consistency_levels() -> Result<()> {
    let policy = ConsistencyPolicy {
        binary_read: ConsistencyLevel::LocalOne,
        binary_write: ConsistencyLevel::Quorum,
        ..Default::default()
    };
    let config = Config::builder().consistency(policy).build()?;
    let (session, store) = setup(&config);
    let id = binary("levels");
    store.write(&id, payload(30).as_slice(), 10)?;
    read_all(&store, &id)?;
    store.delete(&id)?;
    assert_eq!(
        session.executed(),
        vec![
            (Query::DeleteChunks, ConsistencyLevel::Quorum),
            (Query::InsertChunk, ConsistencyLevel::Quorum),
            (Query::InsertChunk, ConsistencyLevel::Quorum),
            (Query::InsertChunk, ConsistencyLevel::Quorum),
            (Query::ReadChunks, ConsistencyLevel::LocalOne),
            (Query::DeleteChunks, ConsistencyLevel::Quorum),
        ]
    );
    Ok(())
}

#[test]
fn failure_after_some_chunks_is_a_partial_write() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("partial");
    let data = payload(50);
    session.fail_after(Query::InsertChunk, 2, "write timeout");
    match store.write(&id, data.as_slice(), 10) {
        Err(Error::PartialWrite {
            identifier,
            written,
            source,
        }) => {
            assert_eq!(identifier, id.as_str());
            assert_eq!(written, 2);
            assert!(matches!(*source, Error::Query(ref m) if m == "write timeout"));
        }
        other => panic!("expected a partial write, got {:?}", other),
    }
    assert_eq!(session.chunk_indices(id.as_str()), vec![0, 1]);

    // a retry of the whole write completes the binary
    session.clear_failures();
    store.write(&id, data.as_slice(), 10)?;
    assert_eq!(read_all(&store, &id)?, data);
    Ok(())
}

#[test]
fn failure_on_first_chunk_is_the_underlying_error() {
    let (session, store) = setup(&Config::default());
    session.fail_after(Query::InsertChunk, 0, "unavailable");
    let result = store.write(&binary("first"), payload(50).as_slice(), 10);
    assert!(matches!(result, Err(Error::Query(m)) if m == "unavailable"));
}

struct FailingReader {
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "upload aborted"));
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(b'x');
        self.remaining -= n;
        Ok(n)
    }
}

#[test]
fn source_errors_are_reported_as_io() {
    let (_session, store) = setup(&Config::default());
    let result = store.write(&binary("aborted"), FailingReader { remaining: 25 }, 10);
    match result {
        Err(Error::PartialWrite {
            written, source, ..
        }) => {
            assert_eq!(written, 2);
            assert!(matches!(*source, Error::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        }
        other => panic!("expected a partial write, got {:?}", other),
    }
}

#[test]
fn missing_chunk_is_an_encoding_error() -> Result<()> {
    let (session, store) = setup(&Config::default());
    let id = binary("gap");
    store.write(&id, payload(30).as_slice(), 10)?;
    assert!(session.remove_chunk(id.as_str(), 1));

    let mut stream = store.read(&id)?;
    let mut first = [0u8; 10];
    stream.read_exact(&mut first)?;
    let err = stream.read_byte().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    assert!(matches!(
        Error::from_io(err),
        Error::Encoding {
            what: "chunkIndex",
            ..
        }
    ));
    Ok(())
}

#[test]
fn read_failure_surfaces_as_query_error() {
    let (session, store) = setup(&Config::default());
    session.fail_after(Query::ReadChunks, 0, "no replicas");
    let result = store.read(&binary("down"));
    assert!(matches!(result, Err(Error::Query(_))));
}

#[test]
fn range_reads_cross_chunk_boundaries() -> Result<()> {
    let (_session, store) = setup(&Config::default());
    let id = binary("range");
    let data = payload(100);
    store.write(&id, data.as_slice(), 8)?;
    let mut out = Vec::new();
    store.read_range(&id, 13, 42)?.read_to_end(&mut out)?;
    assert_eq!(out, data[13..=42]);
    Ok(())
}
