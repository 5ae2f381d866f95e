//! Process-level pieces of the Quarry server: configuration loading and the
//! HTTP embeddings client. The binary in `main.rs` wires them to the store
//! and the API router.

pub mod config;
pub mod embeddings;

pub use config::ServerConfig;
pub use embeddings::{EmbeddingsConfig, HttpEmbeddings};
