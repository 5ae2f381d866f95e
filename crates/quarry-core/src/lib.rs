//! Core types, pure algorithms, and collaborator traits for the Quarry
//! knowledge-graph service.
//!
//! Nothing here touches HTTP or a database. The storage crate implements the
//! traits defined here; the API and server crates depend on both.

pub mod chunk;
pub mod directory;
pub mod embed;
pub mod error;
pub mod rate_limit;
pub mod rdf;
pub mod search;
pub mod world;

pub use error::{Error, Result};
