//! An in-memory [`Session`] that stores rows the way the Cassandra tables do:
//! chunk rows clustered by index, mutable rows clustered by creation instant
//! (newest wins on header reads), append-only immutable rows, and a
//! containment view derived from the `container` column of the newest mutable
//! row of each resource. Inserts are upserts.
//!
//! It also records every executed statement with its consistency level, can
//! be told to fail a given query after a number of successes, and can be saved
//! to and loaded from a JSON snapshot.

use crate::consistency::ConsistencyLevel;
use crate::errors::{Error, Result};
use crate::session::{no_rows, Query, Row, Rows, Session, Statement, Value};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MutableRow {
    created_token: String,
    interaction_model: String,
    has_acl: bool,
    binary_identifier: Option<String>,
    mime_type: Option<String>,
    size: Option<i64>,
    container: Option<String>,
    modified: i64,
    quads: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImmutableRow {
    time: i64,
    quads: Vec<u8>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    binaries: BTreeMap<String, BTreeMap<i32, Vec<u8>>>,
    mutable: BTreeMap<String, BTreeMap<i64, MutableRow>>,
    immutable: BTreeMap<String, Vec<ImmutableRow>>,
}

#[derive(Debug)]
struct Failure {
    query: Query,
    successes_left: usize,
    message: String,
}

#[derive(Debug, Default)]
pub struct MemorySession {
    tables: Arc<RwLock<Tables>>,
    executed: Mutex<Vec<(Query, ConsistencyLevel)>>,
    failures: Mutex<Vec<Failure>>,
    chunk_fetches: Arc<AtomicUsize>,
}

fn read_tables(tables: &RwLock<Tables>) -> RwLockReadGuard<'_, Tables> {
    tables.read().unwrap_or_else(|e| e.into_inner())
}

fn write_tables(tables: &RwLock<Tables>) -> RwLockWriteGuard<'_, Tables> {
    tables.write().unwrap_or_else(|e| e.into_inner())
}

fn param<'a>(stmt: &'a Statement, index: usize) -> Result<&'a Value> {
    stmt.param(index).ok_or_else(|| {
        Error::query(format!(
            "{:?}: missing bound parameter {}",
            stmt.query(),
            index
        ))
    })
}

fn bad_param(stmt: &Statement, index: usize, expected: &str, found: &Value) -> Error {
    Error::query(format!(
        "{:?}: parameter {} should be {}, got {}",
        stmt.query(),
        index,
        expected,
        found.type_name()
    ))
}

fn text_param(stmt: &Statement, index: usize) -> Result<String> {
    match param(stmt, index)? {
        Value::Text(s) => Ok(s.clone()),
        other => Err(bad_param(stmt, index, "text", other)),
    }
}

fn optional_text_param(stmt: &Statement, index: usize) -> Result<Option<String>> {
    match param(stmt, index)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s.clone())),
        other => Err(bad_param(stmt, index, "text", other)),
    }
}

fn int_param(stmt: &Statement, index: usize) -> Result<i32> {
    match param(stmt, index)? {
        Value::Int(v) => Ok(*v),
        other => Err(bad_param(stmt, index, "int", other)),
    }
}

fn optional_bigint_param(stmt: &Statement, index: usize) -> Result<Option<i64>> {
    match param(stmt, index)? {
        Value::Null => Ok(None),
        Value::BigInt(v) => Ok(Some(*v)),
        other => Err(bad_param(stmt, index, "bigint", other)),
    }
}

fn bool_param(stmt: &Statement, index: usize) -> Result<bool> {
    match param(stmt, index)? {
        Value::Boolean(v) => Ok(*v),
        other => Err(bad_param(stmt, index, "boolean", other)),
    }
}

fn timestamp_param(stmt: &Statement, index: usize) -> Result<i64> {
    match param(stmt, index)? {
        Value::Timestamp(v) => Ok(*v),
        other => Err(bad_param(stmt, index, "timestamp", other)),
    }
}

fn blob_param(stmt: &Statement, index: usize) -> Result<Vec<u8>> {
    match param(stmt, index)? {
        Value::Blob(v) => Ok(v.clone()),
        other => Err(bad_param(stmt, index, "blob", other)),
    }
}

/// Chunk rows fetched one at a time, as a paging driver would hand them out.
struct ChunkRows {
    tables: Arc<RwLock<Tables>>,
    identifier: String,
    indices: std::vec::IntoIter<i32>,
    fetches: Arc<AtomicUsize>,
}

impl Iterator for ChunkRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        for index in self.indices.by_ref() {
            let tables = read_tables(&self.tables);
            // a concurrent delete may have removed rows we planned to visit
            let Some(bytes) = tables
                .binaries
                .get(&self.identifier)
                .and_then(|chunks| chunks.get(&index))
            else {
                continue;
            };
            self.fetches.fetch_add(1, Ordering::Relaxed);
            return Some(Ok(Row::new()
                .with("chunkIndex", index)
                .with("chunk", bytes.clone())));
        }
        None
    }
}

fn rows(rows: Vec<Row>) -> Rows {
    Box::new(rows.into_iter().map(Ok))
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot written by [`MemorySession::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let tables: Tables = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded snapshot {} ({} binaries, {} resources)",
            path.display(),
            tables.binaries.len(),
            tables.mutable.len()
        );
        Ok(MemorySession {
            tables: Arc::new(RwLock::new(tables)),
            ..Default::default()
        })
    }

    /// Loads `path` if it exists, otherwise starts empty.
    pub fn open_or_create(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let snapshot = serde_json::to_string(&*read_tables(&self.tables))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(snapshot.as_bytes())?;
        Ok(())
    }

    /// Every statement executed so far, in order, with its consistency level.
    pub fn executed(&self) -> Vec<(Query, ConsistencyLevel)> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many chunk rows have been handed out by chunk reads.
    pub fn chunk_rows_fetched(&self) -> usize {
        self.chunk_fetches.load(Ordering::Relaxed)
    }

    /// Lets `query` succeed `successes` more times, then fails it on every
    /// later execution with `message`.
    pub fn fail_after(&self, query: Query, successes: usize, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Failure {
                query,
                successes_left: successes,
                message: message.into(),
            });
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Stored chunk indices of a binary, ascending.
    pub fn chunk_indices(&self, identifier: &str) -> Vec<i32> {
        read_tables(&self.tables)
            .binaries
            .get(identifier)
            .map(|chunks| chunks.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drops a single chunk row, leaving a gap in the binary.
    pub fn remove_chunk(&self, identifier: &str, index: i32) -> bool {
        write_tables(&self.tables)
            .binaries
            .get_mut(identifier)
            .and_then(|chunks| chunks.remove(&index))
            .is_some()
    }

    /// Identifiers of all stored binaries.
    pub fn binary_identifiers(&self) -> Vec<String> {
        read_tables(&self.tables).binaries.keys().cloned().collect()
    }

    /// Identifiers of all resources that have a header row.
    pub fn resource_identifiers(&self) -> Vec<String> {
        read_tables(&self.tables).mutable.keys().cloned().collect()
    }

    fn check_failure(&self, query: Query) -> Result<()> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(failure) = failures.iter_mut().find(|f| f.query == query) {
            if failure.successes_left == 0 {
                return Err(Error::query(failure.message.clone()));
            }
            failure.successes_left -= 1;
        }
        Ok(())
    }

    fn header_row(identifier: &str, row: &MutableRow) -> Row {
        Row::new()
            .with("identifier", identifier)
            .with("interactionModel", row.interaction_model.as_str())
            .with("hasAcl", row.has_acl)
            .with("binaryIdentifier", row.binary_identifier.clone())
            .with("mimeType", row.mime_type.clone())
            .with("size", row.size)
            .with("container", row.container.clone())
            .with("modified", Value::Timestamp(row.modified))
            .with("createdToken", row.created_token.as_str())
    }

    fn run(&self, stmt: &Statement) -> Result<Rows> {
        match stmt.query() {
            Query::ReadChunks => {
                let identifier = text_param(stmt, 0)?;
                let indices = self.chunk_indices(&identifier);
                trace!("{} chunk rows planned for {}", indices.len(), identifier);
                Ok(Box::new(ChunkRows {
                    tables: Arc::clone(&self.tables),
                    identifier,
                    indices: indices.into_iter(),
                    fetches: Arc::clone(&self.chunk_fetches),
                }))
            }
            Query::InsertChunk => {
                let identifier = text_param(stmt, 0)?;
                let index = int_param(stmt, 1)?;
                let chunk = blob_param(stmt, 2)?;
                write_tables(&self.tables)
                    .binaries
                    .entry(identifier)
                    .or_default()
                    .insert(index, chunk);
                Ok(no_rows())
            }
            Query::DeleteChunks => {
                let identifier = text_param(stmt, 0)?;
                write_tables(&self.tables).binaries.remove(&identifier);
                Ok(no_rows())
            }
            Query::MutableQuads => {
                let identifier = text_param(stmt, 0)?;
                let created = timestamp_param(stmt, 1)?;
                let tables = read_tables(&self.tables);
                let found = tables
                    .mutable
                    .get(&identifier)
                    .and_then(|versions| versions.get(&created))
                    .map(|row| Row::new().with("quads", row.quads.clone()));
                Ok(rows(found.into_iter().collect()))
            }
            Query::ImmutableQuads => {
                let identifier = text_param(stmt, 0)?;
                let tables = read_tables(&self.tables);
                let found = tables
                    .immutable
                    .get(&identifier)
                    .map(|entries| {
                        entries
                            .iter()
                            .map(|e| Row::new().with("quads", e.quads.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(rows(found))
            }
            Query::BasicContainment => {
                let container = text_param(stmt, 0)?;
                let tables = read_tables(&self.tables);
                let found = tables
                    .mutable
                    .iter()
                    .filter_map(|(identifier, versions)| {
                        let (_, newest) = versions.last_key_value()?;
                        (newest.container.as_deref() == Some(container.as_str()))
                            .then(|| Row::new().with("contained", identifier.as_str()))
                    })
                    .collect();
                Ok(rows(found))
            }
            Query::GetResource => {
                let identifier = text_param(stmt, 0)?;
                let tables = read_tables(&self.tables);
                let found = tables
                    .mutable
                    .get(&identifier)
                    .and_then(|versions| versions.last_key_value())
                    .map(|(_, row)| Self::header_row(&identifier, row));
                Ok(rows(found.into_iter().collect()))
            }
            Query::InsertMutable => {
                let identifier = text_param(stmt, 0)?;
                let created = timestamp_param(stmt, 1)?;
                let row = MutableRow {
                    created_token: text_param(stmt, 2)?,
                    interaction_model: text_param(stmt, 3)?,
                    has_acl: bool_param(stmt, 4)?,
                    binary_identifier: optional_text_param(stmt, 5)?,
                    mime_type: optional_text_param(stmt, 6)?,
                    size: optional_bigint_param(stmt, 7)?,
                    container: optional_text_param(stmt, 8)?,
                    modified: timestamp_param(stmt, 9)?,
                    quads: blob_param(stmt, 10)?,
                };
                write_tables(&self.tables)
                    .mutable
                    .entry(identifier)
                    .or_default()
                    .insert(created, row);
                Ok(no_rows())
            }
            Query::InsertImmutable => {
                let identifier = text_param(stmt, 0)?;
                let time = timestamp_param(stmt, 1)?;
                let quads = blob_param(stmt, 2)?;
                write_tables(&self.tables)
                    .immutable
                    .entry(identifier)
                    .or_default()
                    .push(ImmutableRow { time, quads });
                Ok(no_rows())
            }
            Query::Touch => {
                let modified = timestamp_param(stmt, 0)?;
                let identifier = text_param(stmt, 1)?;
                let created = timestamp_param(stmt, 2)?;
                if let Some(row) = write_tables(&self.tables)
                    .mutable
                    .get_mut(&identifier)
                    .and_then(|versions| versions.get_mut(&created))
                {
                    row.modified = modified;
                }
                Ok(no_rows())
            }
            Query::DeleteResource => {
                let identifier = text_param(stmt, 0)?;
                write_tables(&self.tables).mutable.remove(&identifier);
                Ok(no_rows())
            }
        }
    }
}

impl Session for MemorySession {
    fn execute(&self, statement: &Statement) -> Result<Rows> {
        trace!(
            "execute {:?} at {} ({} params)",
            statement.query(),
            statement.consistency(),
            statement.params().len()
        );
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((statement.query(), statement.consistency()));
        self.check_failure(statement.query())?;
        self.run(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_chunk(session: &MemorySession, id: &str, index: i32, bytes: &[u8]) {
        session
            .execute(
                &Statement::new(Query::InsertChunk, ConsistencyLevel::One)
                    .bind(id)
                    .bind(index)
                    .bind(bytes.to_vec()),
            )
            .unwrap();
    }

    #[test]
    fn chunk_rows_come_back_in_index_order() {
        let session = MemorySession::new();
        insert_chunk(&session, "urn:b", 2, b"c");
        insert_chunk(&session, "urn:b", 0, b"a");
        insert_chunk(&session, "urn:b", 1, b"b");
        let rows: Vec<Row> = session
            .execute(&Statement::new(Query::ReadChunks, ConsistencyLevel::One).bind("urn:b"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let indices: Vec<_> = rows.iter().map(|r| r.get("chunkIndex").cloned()).collect();
        assert_eq!(
            indices,
            vec![Some(Value::Int(0)), Some(Value::Int(1)), Some(Value::Int(2))]
        );
    }

    #[test]
    fn chunk_rows_are_fetched_on_demand() {
        let session = MemorySession::new();
        for i in 0..5 {
            insert_chunk(&session, "urn:b", i, b"x");
        }
        let mut rows = session
            .execute(&Statement::new(Query::ReadChunks, ConsistencyLevel::One).bind("urn:b"))
            .unwrap();
        assert_eq!(session.chunk_rows_fetched(), 0);
        rows.next().unwrap().unwrap();
        assert_eq!(session.chunk_rows_fetched(), 1);
    }

    #[test]
    fn failures_trigger_after_successes() {
        let session = MemorySession::new();
        session.fail_after(Query::InsertChunk, 1, "timed out");
        insert_chunk(&session, "urn:b", 0, b"a");
        let err = session
            .execute(
                &Statement::new(Query::InsertChunk, ConsistencyLevel::One)
                    .bind("urn:b")
                    .bind(1i32)
                    .bind(vec![1u8]),
            )
            .err()
            .unwrap();
        assert!(matches!(err, Error::Query(m) if m == "timed out"));
        session.clear_failures();
        insert_chunk(&session, "urn:b", 1, b"b");
        assert_eq!(session.chunk_indices("urn:b"), vec![0, 1]);
    }

    #[test]
    fn wrong_parameter_types_are_rejected() {
        let session = MemorySession::new();
        let result = session.execute(
            &Statement::new(Query::InsertChunk, ConsistencyLevel::One)
                .bind("urn:b")
                .bind("zero")
                .bind(vec![1u8]),
        );
        assert!(matches!(result, Err(Error::Query(_))));
        let missing =
            session.execute(&Statement::new(Query::ReadChunks, ConsistencyLevel::One));
        assert!(matches!(missing, Err(Error::Query(_))));
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let session = MemorySession::new();
        insert_chunk(&session, "urn:b", 0, &[0, 255, 7]);
        session.save(&path).unwrap();
        let loaded = MemorySession::load(&path).unwrap();
        assert_eq!(loaded.chunk_indices("urn:b"), vec![0]);
        assert_eq!(loaded.binary_identifiers(), vec!["urn:b".to_string()]);
        assert!(loaded.executed().is_empty());
    }
}
