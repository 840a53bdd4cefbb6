//! The query-execution capability this crate is written against.
//!
//! Connection management, retries, paging and timeouts all belong to the
//! [`Session`] implementation. Components only ever see a closed set of
//! prepared [`Query`] templates, positional parameters, and a consistency
//! level, and get back a lazy sequence of [`Row`]s.

use crate::consistency::ConsistencyLevel;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use oxigraph::model::NamedNode;
use std::sync::Arc;

pub const BINARY_TABLENAME: &str = "binarydata";
pub const MUTABLE_TABLENAME: &str = "mutabledata";
pub const IMMUTABLE_TABLENAME: &str = "immutabledata";
pub const BASIC_CONTAINMENT_TABLENAME: &str = "basiccontainment";

/// Prepared statements, one per access path. Parameters are bound in the
/// order the placeholders appear in [`Query::cql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    /// (identifier) -> rows of (chunkIndex, chunk), ascending by chunkIndex
    ReadChunks,
    /// (identifier, chunkIndex, chunk)
    InsertChunk,
    /// (identifier)
    DeleteChunks,
    /// (identifier, created) -> rows of (quads)
    MutableQuads,
    /// (identifier) -> rows of (quads)
    ImmutableQuads,
    /// (container) -> rows of (contained)
    BasicContainment,
    /// (identifier) -> at most one header row, newest creation first
    GetResource,
    /// (identifier, created, createdToken, interactionModel, hasAcl,
    ///  binaryIdentifier, mimeType, size, container, modified, quads)
    InsertMutable,
    /// (identifier, time, quads)
    InsertImmutable,
    /// (modified, identifier, created)
    Touch,
    /// (identifier)
    DeleteResource,
}

impl Query {
    pub fn cql(&self) -> &'static str {
        match self {
            Query::ReadChunks => {
                "SELECT chunkIndex, chunk FROM binarydata WHERE identifier = :identifier ORDER BY chunkIndex ASC;"
            }
            Query::InsertChunk => {
                "INSERT INTO binarydata (identifier, chunkIndex, chunk) VALUES (:identifier, :chunkIndex, :chunk);"
            }
            Query::DeleteChunks => "DELETE FROM binarydata WHERE identifier = :identifier;",
            Query::MutableQuads => {
                "SELECT quads FROM mutabledata WHERE identifier = :identifier AND created = :created;"
            }
            Query::ImmutableQuads => {
                "SELECT quads FROM immutabledata WHERE identifier = :identifier;"
            }
            Query::BasicContainment => {
                "SELECT identifier AS contained FROM basiccontainment WHERE container = :container;"
            }
            Query::GetResource => {
                "SELECT identifier, interactionModel, hasAcl, binaryIdentifier, mimeType, size, container, modified, createdToken \
                 FROM mutabledata WHERE identifier = :identifier LIMIT 1;"
            }
            Query::InsertMutable => {
                "INSERT INTO mutabledata (identifier, created, createdToken, interactionModel, hasAcl, binaryIdentifier, \
                 mimeType, size, container, modified, quads) VALUES (:identifier, :created, :createdToken, \
                 :interactionModel, :hasAcl, :binaryIdentifier, :mimeType, :size, :container, :modified, :quads);"
            }
            Query::InsertImmutable => {
                "INSERT INTO immutabledata (identifier, time, quads) VALUES (:identifier, :time, :quads);"
            }
            Query::Touch => {
                "UPDATE mutabledata SET modified = :modified WHERE identifier = :identifier AND created = :created;"
            }
            Query::DeleteResource => "DELETE FROM mutabledata WHERE identifier = :identifier;",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Query::ReadChunks | Query::InsertChunk | Query::DeleteChunks => BINARY_TABLENAME,
            Query::ImmutableQuads | Query::InsertImmutable => IMMUTABLE_TABLENAME,
            Query::BasicContainment => BASIC_CONTAINMENT_TABLENAME,
            Query::MutableQuads
            | Query::GetResource
            | Query::InsertMutable
            | Query::Touch
            | Query::DeleteResource => MUTABLE_TABLENAME,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Query::InsertChunk
                | Query::DeleteChunks
                | Query::InsertMutable
                | Query::InsertImmutable
                | Query::Touch
                | Query::DeleteResource
        )
    }
}

/// A column value as it crosses the session boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Blob(Vec<u8>),
    BigInt(i64),
    Int(i32),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::BigInt(_) => "bigint",
            Value::Int(_) => "int",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl From<&NamedNode> for Value {
    fn from(iri: &NamedNode) -> Self {
        Value::Text(iri.as_str().to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Blob(bytes)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(instant: DateTime<Utc>) -> Self {
        Value::Timestamp(instant.timestamp_millis())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row: named columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push((column.into(), value.into()));
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Moves a value out of the row, leaving `Null` behind.
    pub fn take(&mut self, column: &str) -> Option<Value> {
        self.columns
            .iter_mut()
            .find(|(name, _)| name == column)
            .map(|(_, v)| std::mem::replace(v, Value::Null))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }
}

/// A prepared query with bound parameters and the consistency to run it at.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    query: Query,
    params: Vec<Value>,
    consistency: ConsistencyLevel,
}

impl Statement {
    pub fn new(query: Query, consistency: ConsistencyLevel) -> Self {
        Statement {
            query,
            params: Vec::new(),
            consistency,
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn query(&self) -> Query {
        self.query
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }
}

/// Lazily produced result rows. Each row is fetched when pulled; errors from
/// later pages surface as `Err` items.
pub type Rows = Box<dyn Iterator<Item = Result<Row>> + Send>;

pub fn no_rows() -> Rows {
    Box::new(std::iter::empty())
}

/// Executes prepared statements against the store.
///
/// Implementations own the connection lifecycle. A failed, rejected or timed
/// out query is reported as [`crate::Error::Query`].
pub trait Session: Send + Sync {
    fn execute(&self, statement: &Statement) -> Result<Rows>;
}

impl<S: Session + ?Sized> Session for Arc<S> {
    fn execute(&self, statement: &Statement) -> Result<Rows> {
        (**self).execute(statement)
    }
}

impl<S: Session + ?Sized> Session for &S {
    fn execute(&self, statement: &Statement) -> Result<Rows> {
        (**self).execute(statement)
    }
}
