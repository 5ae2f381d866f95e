//! Error types for `quarry-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("world not found: {0}")]
  WorldNotFound(Uuid),

  #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
  InvalidChunkConfig { size: usize, overlap: usize },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
