//! Typed column codecs.
//!
//! One decode function per stored column type. Each returns the decoded value
//! or [`Error::Encoding`]; a malformed row is never silently skipped.
//! Datasets are stored as N-Quads, which round-trips exactly.

use crate::errors::{Error, Result};
use crate::session::{Row, Value};
use crate::version::VersionToken;
use chrono::{DateTime, TimeZone, Utc};
use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{Dataset, NamedNode, Quad};
use std::io::Cursor;

fn column<'a>(row: &'a Row, name: &'static str) -> Result<&'a Value> {
    row.get(name)
        .ok_or_else(|| Error::encoding(name, "column missing from row"))
}

fn mismatch(name: &'static str, expected: &str, found: &Value) -> Error {
    Error::encoding(
        name,
        format!("expected {}, found {}", expected, found.type_name()),
    )
}

pub fn decode_text(row: &Row, name: &'static str) -> Result<String> {
    decode_optional_text(row, name)?.ok_or_else(|| Error::encoding(name, "unexpected null"))
}

pub fn decode_optional_text(row: &Row, name: &'static str) -> Result<Option<String>> {
    match column(row, name)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s.clone())),
        other => Err(mismatch(name, "text", other)),
    }
}

/// IRIs are stored as their exact text.
pub fn decode_iri(row: &Row, name: &'static str) -> Result<NamedNode> {
    decode_optional_iri(row, name)?.ok_or_else(|| Error::encoding(name, "unexpected null"))
}

pub fn decode_optional_iri(row: &Row, name: &'static str) -> Result<Option<NamedNode>> {
    decode_optional_text(row, name)?
        .map(|text| {
            NamedNode::new(text.as_str())
                .map_err(|e| Error::encoding(name, format!("bad IRI '{}': {}", text, e)))
        })
        .transpose()
}

pub fn decode_bigint(row: &Row, name: &'static str) -> Result<i64> {
    decode_optional_bigint(row, name)?.ok_or_else(|| Error::encoding(name, "unexpected null"))
}

pub fn decode_optional_bigint(row: &Row, name: &'static str) -> Result<Option<i64>> {
    match column(row, name)? {
        Value::Null => Ok(None),
        Value::BigInt(v) => Ok(Some(*v)),
        other => Err(mismatch(name, "bigint", other)),
    }
}

pub fn decode_int(row: &Row, name: &'static str) -> Result<i32> {
    match column(row, name)? {
        Value::Int(v) => Ok(*v),
        other => Err(mismatch(name, "int", other)),
    }
}

/// A null boolean reads as `false`, as the driver reports it.
pub fn decode_boolean(row: &Row, name: &'static str) -> Result<bool> {
    match column(row, name)? {
        Value::Null => Ok(false),
        Value::Boolean(v) => Ok(*v),
        other => Err(mismatch(name, "boolean", other)),
    }
}

pub fn decode_timestamp(row: &Row, name: &'static str) -> Result<DateTime<Utc>> {
    match column(row, name)? {
        Value::Timestamp(ms) => Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| Error::encoding(name, format!("timestamp {} out of range", ms))),
        other => Err(mismatch(name, "timestamp", other)),
    }
}

pub fn decode_version_token(row: &Row, name: &'static str) -> Result<VersionToken> {
    decode_text(row, name)?.parse()
}

/// Moves a blob out of the row and exposes it as a reader over exactly the
/// stored bytes.
pub fn take_blob(row: &mut Row, name: &'static str) -> Result<Cursor<Vec<u8>>> {
    match row.take(name) {
        Some(Value::Blob(bytes)) => Ok(Cursor::new(bytes)),
        Some(other) => Err(mismatch(name, "blob", &other)),
        None => Err(Error::encoding(name, "column missing from row")),
    }
}

/// Renders blob bytes as UTF-8 text for diagnostics. Lossy for anything that
/// is not text; never use it to move binary content.
pub fn format_blob_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Inverse of [`format_blob_text`] for text payloads.
pub fn parse_blob_text(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

pub fn encode_dataset(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut serializer = RdfSerializer::from_format(RdfFormat::NQuads).for_writer(Vec::new());
    for quad in dataset.iter() {
        serializer
            .serialize_quad(quad)
            .map_err(|e| Error::encoding("quads", e.to_string()))?;
    }
    serializer
        .finish()
        .map_err(|e| Error::encoding("quads", e.to_string()))
}

pub fn encode_quads<'a, I>(quads: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a Quad>,
{
    let mut serializer = RdfSerializer::from_format(RdfFormat::NQuads).for_writer(Vec::new());
    for quad in quads {
        serializer
            .serialize_quad(quad)
            .map_err(|e| Error::encoding("quads", e.to_string()))?;
    }
    serializer
        .finish()
        .map_err(|e| Error::encoding("quads", e.to_string()))
}

fn parse_quads(name: &'static str, bytes: &[u8]) -> Result<Vec<Quad>> {
    RdfParser::from_format(RdfFormat::NQuads)
        .for_reader(bytes)
        .map(|quad| quad.map_err(|e| Error::encoding(name, e.to_string())))
        .collect()
}

/// Decodes a serialized dataset column into its quads, in stored order.
/// A null column is an empty dataset.
pub fn decode_quads(row: &Row, name: &'static str) -> Result<Vec<Quad>> {
    match column(row, name)? {
        Value::Null => Ok(Vec::new()),
        Value::Blob(bytes) => parse_quads(name, bytes),
        Value::Text(text) => parse_quads(name, text.as_bytes()),
        other => Err(mismatch(name, "blob", other)),
    }
}
