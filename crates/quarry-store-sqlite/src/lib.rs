//! SQLite backend for Quarry: tenant metadata, per-world shards, ingestion,
//! hybrid search, and rate-limit buckets.
//!
//! Local shards wrap [`tokio_rusqlite`] so all database access runs on a
//! dedicated thread without blocking the async runtime. Remote shards speak
//! the libsql HTTP protocol with the same SQL.

mod encode;
mod schema;

pub mod backend;
pub mod directory;
pub mod error;
pub mod ingest;
pub mod manager;
pub mod rate_limit;
pub mod remote;
pub mod search;
pub mod shard;

pub use backend::{Backend, BackendConfig, RemoteBackendConfig};
pub use directory::SqliteDirectory;
pub use error::{Error, Result};
pub use ingest::{IngestConfig, IngestionPipeline, PatchBuffer};
pub use manager::ShardManager;
pub use rate_limit::RateLimiter;
pub use search::{HybridSearchEngine, SearchConfig};
pub use shard::{ShardHandle, Stmt};

#[cfg(test)]
mod tests;
