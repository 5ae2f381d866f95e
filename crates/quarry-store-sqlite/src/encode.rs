//! Encoding and decoding helpers between Rust domain types and the values
//! stored in SQLite columns, plus strict typed parsing of result rows.
//!
//! Timestamps are RFC 3339 strings. Shard locators are compact JSON. Vectors
//! are little-endian `f32` arrays.

use chrono::{DateTime, Utc};
use quarry_core::{
  rdf::{Chunk, Triple},
  world::{ShardLocator, World},
};
use rusqlite::types::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_locator(locator: &ShardLocator) -> Result<String> {
  Ok(serde_json::to_string(locator)?)
}

pub fn decode_locator(s: &str) -> Result<ShardLocator> { Ok(serde_json::from_str(s)?) }

// ─── Vectors ─────────────────────────────────────────────────────────────────

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
  vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
  if bytes.len() % 4 != 0 {
    return Err(Error::MalformedRow(format!(
      "vector blob length {} is not a multiple of 4",
      bytes.len()
    )));
  }
  Ok(
    bytes
      .chunks_exact(4)
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect(),
  )
}

/// Cosine distance (`1 - cosine similarity`) between two encoded vectors.
/// A zero vector is maximally distant from everything.
pub fn cosine_distance(a: &[u8], b: &[u8]) -> Result<f64> {
  if a.len() != b.len() {
    return Err(Error::DimensionMismatch { expected: a.len() / 4, actual: b.len() / 4 });
  }
  let (a, b) = (decode_vector(a)?, decode_vector(b)?);
  let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
  for (x, y) in a.iter().zip(&b) {
    let (x, y) = (f64::from(*x), f64::from(*y));
    dot += x * y;
    na += x * x;
    nb += y * y;
  }
  if na == 0.0 || nb == 0.0 {
    return Ok(1.0);
  }
  Ok(1.0 - dot / (na.sqrt() * nb.sqrt()))
}

// ─── Row access ──────────────────────────────────────────────────────────────

/// A positional view over one result row with strict typed accessors.
pub struct RowReader<'a> {
  table: &'static str,
  row:   &'a [Value],
}

impl<'a> RowReader<'a> {
  pub fn new(table: &'static str, row: &'a [Value], columns: usize) -> Result<Self> {
    if row.len() != columns {
      return Err(Error::MalformedRow(format!(
        "{table}: expected {columns} columns, got {}",
        row.len()
      )));
    }
    Ok(Self { table, row })
  }

  fn mismatch(&self, idx: usize, expected: &str) -> Error {
    Error::MalformedRow(format!(
      "{}: column {idx} expected {expected}, got {:?}",
      self.table, self.row[idx]
    ))
  }

  pub fn text(&self, idx: usize) -> Result<String> {
    match &self.row[idx] {
      Value::Text(s) => Ok(s.clone()),
      _ => Err(self.mismatch(idx, "text")),
    }
  }

  pub fn opt_text(&self, idx: usize) -> Result<Option<String>> {
    match &self.row[idx] {
      Value::Null => Ok(None),
      Value::Text(s) => Ok(Some(s.clone())),
      _ => Err(self.mismatch(idx, "text or null")),
    }
  }

  pub fn integer(&self, idx: usize) -> Result<i64> {
    match &self.row[idx] {
      Value::Integer(i) => Ok(*i),
      _ => Err(self.mismatch(idx, "integer")),
    }
  }

  /// A 1-based rank: a positive integer or null.
  pub fn opt_rank(&self, idx: usize) -> Result<Option<u32>> {
    match &self.row[idx] {
      Value::Null => Ok(None),
      Value::Integer(i) if *i > 0 => u32::try_from(*i)
        .map(Some)
        .map_err(|_| self.mismatch(idx, "rank")),
      _ => Err(self.mismatch(idx, "positive integer or null")),
    }
  }

  pub fn blob(&self, idx: usize) -> Result<&'a [u8]> {
    let row: &'a [Value] = self.row;
    match &row[idx] {
      Value::Blob(b) => Ok(b),
      _ => Err(self.mismatch(idx, "blob")),
    }
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `worlds` row.
pub struct RawWorld {
  pub id:              String,
  pub organization_id: String,
  pub label:           String,
  pub description:     Option<String>,
  pub shard_locator:   Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
  pub deleted_at:      Option<String>,
}

pub const WORLD_COLUMNS: &str = "id, organization_id, label, description, shard_locator, \
                                 created_at, updated_at, deleted_at";

impl RawWorld {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      organization_id: row.get(1)?,
      label:           row.get(2)?,
      description:     row.get(3)?,
      shard_locator:   row.get(4)?,
      created_at:      row.get(5)?,
      updated_at:      row.get(6)?,
      deleted_at:      row.get(7)?,
    })
  }

  pub fn into_world(self) -> Result<World> {
    Ok(World {
      id:              decode_uuid(&self.id)?,
      organization_id: self.organization_id,
      label:           self.label,
      description:     self.description,
      shard_locator:   self.shard_locator.as_deref().map(decode_locator).transpose()?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
      deleted_at:      self.deleted_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

pub fn parse_triple(row: &[Value]) -> Result<Triple> {
  let r = RowReader::new("triples", row, 4)?;
  Ok(Triple {
    id:        r.text(0)?,
    subject:   r.text(1)?,
    predicate: r.text(2)?,
    object:    r.text(3)?,
  })
}

pub fn parse_chunk(row: &[Value]) -> Result<Chunk> {
  let r = RowReader::new("chunks", row, 6)?;
  Ok(Chunk {
    id:        r.text(0)?,
    triple_id: r.text(1)?,
    subject:   r.text(2)?,
    predicate: r.text(3)?,
    text:      r.text(4)?,
    vector:    decode_vector(r.blob(5)?)?,
  })
}
