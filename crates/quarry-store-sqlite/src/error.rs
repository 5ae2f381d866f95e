//! Error type for `quarry-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] quarry_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("world not found: {0}")]
  WorldNotFound(Uuid),

  /// The world has no recorded shard location and the backend has no record
  /// of one either.
  #[error("no shard found for world {0}")]
  ShardNotFound(Uuid),

  #[error("failed to provision shard for world {world_id}: {reason}")]
  ShardProvisioningFailed { world_id: Uuid, reason: String },

  #[error("embedding failed: {0}")]
  Embedding(#[source] BoxError),

  #[error("world directory error: {0}")]
  Directory(#[source] BoxError),

  #[error("shard for world {world_id} unavailable: {reason}")]
  SearchShardUnavailable { world_id: Uuid, reason: String },

  #[error("vector dimensionality mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  /// A row read from storage did not have the expected shape.
  #[error("malformed row: {0}")]
  MalformedRow(String),

  #[error("remote database error: {0}")]
  Remote(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl Error {
  pub(crate) fn embedding(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Embedding(Box::new(e))
  }

  pub(crate) fn directory(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Directory(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
