//! [`ShardHandle`]: an open connection to one world's database.
//!
//! Local shards (in-memory or file) run on a `tokio_rusqlite` connection;
//! remote shards go over the libsql HTTP protocol. Both accept the same SQL,
//! so everything above this module is written once.

use std::path::Path;

use rusqlite::{functions::FunctionFlags, types::Value};

use crate::{Result, encode::cosine_distance, remote::RemoteShard, schema::Dialect};

// ─── Statements ──────────────────────────────────────────────────────────────

/// A SQL statement with positional parameters.
#[derive(Debug, Clone)]
pub struct Stmt {
  pub sql:    String,
  pub params: Vec<Value>,
}

impl Stmt {
  pub fn new(sql: impl Into<String>) -> Self { Self { sql: sql.into(), params: vec![] } }

  pub fn bind(mut self, value: impl Into<Value>) -> Self {
    self.params.push(value.into());
    self
  }
}

/// Result rows, each a list of column values in select order.
pub type Rows = Vec<Vec<Value>>;

// ─── Local shard ─────────────────────────────────────────────────────────────

/// A shard backed by a local SQLite database.
///
/// Cheap to clone; the inner connection is reference-counted.
#[derive(Clone)]
pub struct LocalShard {
  conn: tokio_rusqlite::Connection,
}

impl LocalShard {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::prepare(conn).await
  }

  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::prepare(conn).await
  }

  /// Apply per-connection pragmas and register SQL functions.
  async fn prepare(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        register_vector_functions(conn)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn })
  }

  pub async fn execute_batch(&self, sql: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn transaction(&self, stmts: Vec<Stmt>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for stmt in &stmts {
          tx.execute(&stmt.sql, rusqlite::params_from_iter(stmt.params.iter()))?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn query(&self, stmt: Stmt) -> Result<Rows> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut prepared = conn.prepare(&stmt.sql)?;
        let columns = prepared.column_count();
        let rows = prepared
          .query_map(rusqlite::params_from_iter(stmt.params.iter()), |row| {
            (0..columns)
              .map(|i| row.get::<_, Value>(i))
              .collect::<rusqlite::Result<Vec<_>>>()
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }
}

/// Register `vector_distance_cos(a, b)`, matching libsql's built-in of the
/// same name, so vector queries run unchanged on local shards.
fn register_vector_functions(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.create_scalar_function(
    "vector_distance_cos",
    2,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let a = ctx
        .get_raw(0)
        .as_blob()
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
      let b = ctx
        .get_raw(1)
        .as_blob()
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
      cosine_distance(a, b).map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
    },
  )
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// An open shard, local or remote.
#[derive(Clone)]
pub enum ShardHandle {
  Local(LocalShard),
  Remote(RemoteShard),
}

impl ShardHandle {
  pub fn dialect(&self) -> Dialect {
    match self {
      Self::Local(_) => Dialect::Sqlite,
      Self::Remote(_) => Dialect::Libsql,
    }
  }

  /// Run several `;`-separated statements without parameters.
  pub async fn execute_batch(&self, sql: String) -> Result<()> {
    match self {
      Self::Local(s) => s.execute_batch(sql).await,
      Self::Remote(s) => s.execute_batch(&sql).await,
    }
  }

  /// Run `stmts` in order inside one transaction; all or nothing.
  pub async fn transaction(&self, stmts: Vec<Stmt>) -> Result<()> {
    if stmts.is_empty() {
      return Ok(());
    }
    match self {
      Self::Local(s) => s.transaction(stmts).await,
      Self::Remote(s) => s.transaction(&stmts).await,
    }
  }

  pub async fn query(&self, stmt: Stmt) -> Result<Rows> {
    match self {
      Self::Local(s) => s.query(stmt).await,
      Self::Remote(s) => s.query(&stmt).await,
    }
  }
}

impl std::fmt::Debug for ShardHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Local(_) => f.write_str("ShardHandle::Local"),
      Self::Remote(r) => write!(f, "ShardHandle::Remote({})", r.endpoint()),
    }
  }
}
