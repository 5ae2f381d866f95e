//! Storage backends that physically provision world shards.
//!
//! The backend is chosen once, from configuration, when the process starts.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use quarry_core::world::ShardLocator;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  remote::{PlatformClient, RemoteShard},
  shard::{LocalShard, ShardHandle},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Which backend to provision new shards on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
  /// Process-local in-memory databases; lost on restart.
  #[default]
  Memory,
  /// One SQLite file per world under `dir`.
  File { dir: PathBuf },
  /// One managed libsql database per world.
  Remote(RemoteBackendConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBackendConfig {
  #[serde(default = "default_api_base_url")]
  pub api_base_url: String,
  pub organization: String,
  pub api_token:    String,
  #[serde(default = "default_group")]
  pub group:        String,
  #[serde(default = "default_name_prefix")]
  pub name_prefix:  String,
}

fn default_api_base_url() -> String { "https://api.turso.tech".to_owned() }

fn default_group() -> String { "default".to_owned() }

fn default_name_prefix() -> String { "world".to_owned() }

// ─── Backend ─────────────────────────────────────────────────────────────────

pub enum Backend {
  Memory(MemoryBackend),
  File(FileBackend),
  Remote(RemoteBackend),
}

impl Backend {
  pub fn from_config(config: &BackendConfig) -> Self {
    match config {
      BackendConfig::Memory => Self::Memory(MemoryBackend::default()),
      BackendConfig::File { dir } => Self::File(FileBackend::new(dir.clone())),
      BackendConfig::Remote(cfg) => Self::Remote(RemoteBackend::new(cfg)),
    }
  }

  /// Allocate fresh storage for `world_id` and return where it lives.
  pub async fn provision(&self, world_id: Uuid) -> Result<ShardLocator> {
    match self {
      Self::Memory(b) => b.provision(world_id).await,
      Self::File(b) => b.provision(world_id).await,
      Self::Remote(b) => b.provision(world_id).await,
    }
  }

  /// Find existing storage for `world_id`, if the backend has any.
  pub async fn lookup(&self, world_id: Uuid) -> Result<Option<ShardLocator>> {
    match self {
      Self::Memory(b) => Ok(b.lookup(world_id)),
      Self::File(b) => b.lookup(world_id).await,
      Self::Remote(b) => b.lookup(world_id).await,
    }
  }

  /// Open a connection to the shard at `locator`.
  pub async fn connect(&self, locator: &ShardLocator) -> Result<ShardHandle> {
    match locator {
      ShardLocator::Memory { name } => match self {
        Self::Memory(b) => b.connect(name),
        _ => Err(Error::Config(format!(
          "in-memory shard {name:?} cannot be opened by a persistent backend"
        ))),
      },
      ShardLocator::File { path } => Ok(ShardHandle::Local(LocalShard::open(path).await?)),
      ShardLocator::Remote { url, auth_token } => {
        let client = match self {
          Self::Remote(b) => b.platform.http().clone(),
          _ => reqwest::Client::new(),
        };
        Ok(ShardHandle::Remote(RemoteShard::new(client, url, auth_token.clone())))
      }
    }
  }

  /// Destroy the storage of `world_id`.
  pub async fn deprovision(&self, world_id: Uuid, locator: Option<&ShardLocator>) -> Result<()> {
    match self {
      Self::Memory(b) => {
        b.deprovision(world_id);
        Ok(())
      }
      Self::File(b) => {
        let path = match locator {
          Some(ShardLocator::File { path }) => path.clone(),
          _ => b.path_for(world_id),
        };
        remove_database_files(&path).await
      }
      Self::Remote(b) => b.deprovision(world_id).await,
    }
  }
}

// ─── Memory ──────────────────────────────────────────────────────────────────

/// Keeps every shard's connection alive in a registry keyed by world id.
#[derive(Default)]
pub struct MemoryBackend {
  shards: Mutex<HashMap<Uuid, LocalShard>>,
}

impl MemoryBackend {
  async fn provision(&self, world_id: Uuid) -> Result<ShardLocator> {
    let shard = LocalShard::open_in_memory().await?;
    self
      .shards
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(world_id, shard);
    Ok(ShardLocator::Memory { name: world_id.to_string() })
  }

  fn lookup(&self, world_id: Uuid) -> Option<ShardLocator> {
    let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
    shards
      .contains_key(&world_id)
      .then(|| ShardLocator::Memory { name: world_id.to_string() })
  }

  fn connect(&self, name: &str) -> Result<ShardHandle> {
    let world_id = Uuid::parse_str(name)?;
    let shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
    shards
      .get(&world_id)
      .cloned()
      .map(ShardHandle::Local)
      .ok_or(Error::ShardNotFound(world_id))
  }

  fn deprovision(&self, world_id: Uuid) {
    self
      .shards
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&world_id);
  }
}

// ─── File ────────────────────────────────────────────────────────────────────

pub struct FileBackend {
  dir: PathBuf,
}

impl FileBackend {
  pub fn new(dir: PathBuf) -> Self { Self { dir } }

  pub fn path_for(&self, world_id: Uuid) -> PathBuf {
    self.dir.join(format!("{}.db", world_id.simple()))
  }

  async fn provision(&self, world_id: Uuid) -> Result<ShardLocator> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.path_for(world_id);
    // Opening creates the file; the connection is dropped straight away and
    // reopened by the manager.
    LocalShard::open(&path).await?;
    debug!(path = %path.display(), "created shard file");
    Ok(ShardLocator::File { path })
  }

  async fn lookup(&self, world_id: Uuid) -> Result<Option<ShardLocator>> {
    let path = self.path_for(world_id);
    Ok(
      tokio::fs::try_exists(&path)
        .await?
        .then_some(ShardLocator::File { path }),
    )
  }
}

/// Remove a database file and its write-ahead-log sidecars. Missing files are
/// not an error.
async fn remove_database_files(path: &Path) -> Result<()> {
  let mut targets = vec![path.to_path_buf()];
  for suffix in ["-wal", "-shm"] {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(suffix);
    targets.push(PathBuf::from(sidecar));
  }
  for target in targets {
    match tokio::fs::remove_file(&target).await {
      Ok(()) => debug!(path = %target.display(), "removed"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }
  }
  Ok(())
}

// ─── Remote ──────────────────────────────────────────────────────────────────

pub struct RemoteBackend {
  platform:    PlatformClient,
  group:       String,
  name_prefix: String,
}

impl RemoteBackend {
  pub fn new(config: &RemoteBackendConfig) -> Self {
    Self {
      platform:    PlatformClient::new(
        reqwest::Client::new(),
        &config.api_base_url,
        config.organization.clone(),
        config.api_token.clone(),
      ),
      group:       config.group.clone(),
      name_prefix: config.name_prefix.clone(),
    }
  }

  pub fn database_name(&self, world_id: Uuid) -> String {
    format!("{}-{}", self.name_prefix, world_id.simple())
  }

  async fn provision(&self, world_id: Uuid) -> Result<ShardLocator> {
    let name = self.database_name(world_id);
    let hostname = self.platform.create_database(&name, &self.group).await?;
    let auth_token = match self.platform.create_token(&name).await {
      Ok(token) => token,
      Err(e) => {
        // Don't leak a database nobody can reach.
        if let Err(cleanup) = self.platform.delete_database(&name).await {
          warn!(
            %world_id,
            database = %name,
            error = %cleanup,
            "failed to delete database after token error"
          );
        }
        return Err(e);
      }
    };
    info!(%world_id, database = %name, "provisioned remote database");
    Ok(ShardLocator::Remote { url: format!("libsql://{hostname}"), auth_token })
  }

  async fn lookup(&self, world_id: Uuid) -> Result<Option<ShardLocator>> {
    let name = self.database_name(world_id);
    let Some(hostname) = self.platform.get_database(&name).await? else {
      return Ok(None);
    };
    let auth_token = self.platform.create_token(&name).await?;
    Ok(Some(ShardLocator::Remote { url: format!("libsql://{hostname}"), auth_token }))
  }

  async fn deprovision(&self, world_id: Uuid) -> Result<()> {
    let name = self.database_name(world_id);
    self.platform.delete_database(&name).await?;
    info!(%world_id, database = %name, "deleted remote database");
    Ok(())
  }
}
