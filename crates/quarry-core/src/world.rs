//! Worlds: tenant-owned RDF stores, each on its own shard.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a world's physical database lives.
///
/// Persisted in the world directory only after the backend has confirmed a
/// successful provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardLocator {
  /// A process-local in-memory database registered under `name`.
  Memory { name: String },
  /// A SQLite file on local disk.
  File { path: PathBuf },
  /// A remote managed libsql database reached over HTTP.
  Remote { url: String, auth_token: String },
}

/// Metadata for one world. The triples themselves live in its shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
  pub id:              Uuid,
  pub organization_id: String,
  pub label:           String,
  pub description:     Option<String>,
  /// Never serialised: remote locators carry credentials.
  #[serde(skip)]
  pub shard_locator:   Option<ShardLocator>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
  pub deleted_at:      Option<DateTime<Utc>>,
}

impl World {
  pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }
}

/// Input for [`WorldDirectory::create_world`](crate::directory::WorldDirectory::create_world).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorld {
  pub organization_id: String,
  pub label:           String,
  #[serde(default)]
  pub description:     Option<String>,
}

/// Partial metadata update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldUpdate {
  #[serde(default)]
  pub label:       Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}
