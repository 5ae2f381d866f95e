//! [`ShardManager`]: creates, resolves, and destroys per-world shards.
//!
//! Open handles are cached per world. Each cache slot is a
//! [`tokio::sync::OnceCell`], so two requests racing to resolve the same world
//! share one lookup instead of both reaching the backend.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, PoisonError},
};

use quarry_core::{directory::WorldDirectory, world::ShardLocator};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  backend::Backend,
  encode::RowReader,
  schema::shard_schema,
  shard::{ShardHandle, Stmt},
};

type HandleCell = Arc<OnceCell<ShardHandle>>;

pub struct ShardManager<D> {
  directory:   Arc<D>,
  backend:     Backend,
  /// Embedding dimensionality every shard is initialised with.
  dimensions:  usize,
  handles:     Mutex<HashMap<Uuid, HandleCell>>,
  initialized: Mutex<HashSet<Uuid>>,
}

impl<D: WorldDirectory> ShardManager<D> {
  pub fn new(directory: Arc<D>, backend: Backend, dimensions: usize) -> Self {
    Self {
      directory,
      backend,
      dimensions,
      handles: Mutex::new(HashMap::new()),
      initialized: Mutex::new(HashSet::new()),
    }
  }

  pub fn directory(&self) -> &Arc<D> { &self.directory }

  pub fn dimensions(&self) -> usize { self.dimensions }

  /// Whether the shard schema has been initialised for `world_id` by this
  /// process.
  pub fn is_initialized(&self, world_id: Uuid) -> bool {
    self
      .initialized
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains(&world_id)
  }

  /// Provision a shard for an existing world and initialise its schema.
  ///
  /// The world's locator is persisted only once the shard is usable; any
  /// failure before that tears the new storage down again. Calling this for
  /// a world that already has a shard returns the existing one.
  pub async fn create(&self, world_id: Uuid) -> Result<ShardHandle> {
    let world = self
      .directory
      .get_world(world_id)
      .await
      .map_err(Error::directory)?
      .ok_or(Error::WorldNotFound(world_id))?;
    if world.shard_locator.is_some() {
      debug!(%world_id, "shard already provisioned");
      return self.get(world_id).await;
    }

    let locator = self
      .backend
      .provision(world_id)
      .await
      .map_err(|e| Error::ShardProvisioningFailed { world_id, reason: e.to_string() })?;

    let handle = match self.open(world_id, &locator).await {
      Ok(handle) => handle,
      Err(e) => {
        self.discard(world_id, &locator).await;
        return Err(Error::ShardProvisioningFailed { world_id, reason: e.to_string() });
      }
    };

    if let Err(e) = self
      .directory
      .set_shard_locator(world_id, Some(locator.clone()))
      .await
    {
      self.discard(world_id, &locator).await;
      return Err(Error::directory(e));
    }

    self
      .handles
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(world_id, Arc::new(OnceCell::new_with(Some(handle.clone()))));
    info!(%world_id, ?handle, "created shard");
    Ok(handle)
  }

  /// Resolve the shard of `world_id`, connecting and initialising it on
  /// first use.
  pub async fn get(&self, world_id: Uuid) -> Result<ShardHandle> {
    let cell = self.cell(world_id);
    let handle = cell.get_or_try_init(|| self.resolve(world_id)).await?;
    Ok(handle.clone())
  }

  /// Destroy the shard of `world_id` and forget its location.
  pub async fn delete(&self, world_id: Uuid) -> Result<()> {
    let world = self
      .directory
      .get_world(world_id)
      .await
      .map_err(Error::directory)?;
    let locator = world.as_ref().and_then(|w| w.shard_locator.clone());

    self.evict(world_id);
    self.backend.deprovision(world_id, locator.as_ref()).await?;
    if world.is_some() {
      self
        .directory
        .set_shard_locator(world_id, None)
        .await
        .map_err(Error::directory)?;
    }
    info!(%world_id, "deleted shard");
    Ok(())
  }

  /// Drop any cached handle for `world_id` without touching its storage.
  ///
  /// The next [`get`](Self::get) consults the directory again, so a world
  /// soft-deleted since it was cached resolves to
  /// [`ShardNotFound`](Error::ShardNotFound).
  pub fn evict(&self, world_id: Uuid) {
    self.handles.lock().unwrap_or_else(PoisonError::into_inner).remove(&world_id);
    self
      .initialized
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&world_id);
    debug!(%world_id, "evicted cached shard handle");
  }

  // ─── Internals ─────────────────────────────────────────────────────────────

  fn cell(&self, world_id: Uuid) -> HandleCell {
    self
      .handles
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(world_id)
      .or_default()
      .clone()
  }

  async fn resolve(&self, world_id: Uuid) -> Result<ShardHandle> {
    let world = self
      .directory
      .get_world(world_id)
      .await
      .map_err(Error::directory)?
      .ok_or(Error::WorldNotFound(world_id))?;
    if world.is_deleted() {
      return Err(Error::ShardNotFound(world_id));
    }

    let locator = match world.shard_locator {
      Some(locator) => locator,
      None => {
        let locator = self
          .backend
          .lookup(world_id)
          .await?
          .ok_or(Error::ShardNotFound(world_id))?;
        self
          .directory
          .set_shard_locator(world_id, Some(locator.clone()))
          .await
          .map_err(Error::directory)?;
        debug!(%world_id, "recorded shard location found by backend");
        locator
      }
    };

    self.open(world_id, &locator).await
  }

  async fn open(&self, world_id: Uuid, locator: &ShardLocator) -> Result<ShardHandle> {
    let handle = self.backend.connect(locator).await?;
    self.ensure_schema(world_id, &handle).await?;
    Ok(handle)
  }

  /// Run the shard DDL unless this process already has, and check the
  /// shard's recorded dimensionality.
  async fn ensure_schema(&self, world_id: Uuid, handle: &ShardHandle) -> Result<()> {
    if self.is_initialized(world_id) {
      return Ok(());
    }

    handle
      .execute_batch(shard_schema(self.dimensions, handle.dialect()))
      .await?;
    handle
      .transaction(vec![
        Stmt::new("INSERT OR IGNORE INTO shard_meta (key, value) VALUES ('dimensions', ?1)")
          .bind(self.dimensions.to_string()),
      ])
      .await?;

    let rows = handle
      .query(Stmt::new("SELECT value FROM shard_meta WHERE key = 'dimensions'"))
      .await?;
    let row = rows
      .first()
      .ok_or_else(|| Error::MalformedRow("shard_meta has no dimensions".into()))?;
    let recorded = RowReader::new("shard_meta", row, 1)?.text(0)?;
    let recorded: usize = recorded
      .parse()
      .map_err(|_| Error::MalformedRow(format!("bad shard dimensions {recorded:?}")))?;
    if recorded != self.dimensions {
      return Err(Error::DimensionMismatch { expected: recorded, actual: self.dimensions });
    }

    self
      .initialized
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(world_id);
    debug!(%world_id, "initialised shard schema");
    Ok(())
  }

  /// Best-effort teardown of storage that never became usable.
  async fn discard(&self, world_id: Uuid, locator: &ShardLocator) {
    if let Err(e) = self.backend.deprovision(world_id, Some(locator)).await {
      warn!(%world_id, error = %e, "failed to clean up partially provisioned shard");
    }
  }
}
