//! SQL schemas for the metadata database and for world shards.
//!
//! Both are idempotent thanks to `CREATE ... IF NOT EXISTS`.

/// Tenant metadata and rate-limit buckets. Executed once when the directory
/// is opened.
pub const METADATA_SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS worlds (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    label           TEXT NOT NULL,
    description     TEXT,
    shard_locator   TEXT,            -- JSON-encoded ShardLocator or NULL
    created_at      TEXT NOT NULL,   -- ISO 8601 UTC
    updated_at      TEXT NOT NULL,
    deleted_at      TEXT
);

CREATE INDEX IF NOT EXISTS worlds_org_idx ON worlds(organization_id);

CREATE TABLE IF NOT EXISTS rate_limits (
    key         TEXT PRIMARY KEY,    -- '{identity}:{feature}'
    tokens      REAL NOT NULL,
    last_refill INTEGER NOT NULL     -- unix millis
);

PRAGMA user_version = 1;
";

/// Which SQL engine a shard runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  /// Bundled SQLite with `vector_distance_cos` registered by us.
  Sqlite,
  /// libsql, which adds native vector indexes.
  Libsql,
}

/// Per-shard DDL. `dimensions` is baked into the vector column type.
pub fn shard_schema(dimensions: usize, dialect: Dialect) -> String {
  let mut ddl = format!(
    "
CREATE TABLE IF NOT EXISTS shard_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS triples (
    id        TEXT PRIMARY KEY,      -- SHA-256 of the canonical quad
    subject   TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id        TEXT PRIMARY KEY,      -- SHA-256 of '{{triple_id}}:chunk:{{index}}'
    triple_id TEXT NOT NULL REFERENCES triples(id) ON DELETE CASCADE,
    subject   TEXT NOT NULL,
    predicate TEXT NOT NULL,
    text      TEXT NOT NULL,
    vector    F32_BLOB({dimensions}) NOT NULL
);

CREATE INDEX IF NOT EXISTS chunks_triple_idx    ON chunks(triple_id);
CREATE INDEX IF NOT EXISTS chunks_subject_idx   ON chunks(subject);
CREATE INDEX IF NOT EXISTS chunks_predicate_idx ON chunks(predicate);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content='chunks',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS chunks_after_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_after_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_after_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;
"
  );

  if dialect == Dialect::Libsql {
    ddl.push_str(
      "
CREATE INDEX IF NOT EXISTS chunks_vector_idx ON chunks(libsql_vector_idx(vector));
",
    );
  }
  ddl
}
