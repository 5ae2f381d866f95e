//! [`SqliteDirectory`]: the SQLite implementation of [`WorldDirectory`].

use std::path::Path;

use chrono::Utc;
use quarry_core::{
  directory::WorldDirectory,
  world::{NewWorld, ShardLocator, World, WorldUpdate},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Result,
  encode::{RawWorld, WORLD_COLUMNS, encode_dt, encode_locator, encode_uuid},
  rate_limit::RateLimiter,
  schema::METADATA_SCHEMA,
};

/// Tenant metadata backed by a single SQLite file. The same database holds
/// rate-limit buckets.
///
/// Cheap to clone; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteDirectory {
  conn: tokio_rusqlite::Connection,
}

impl SqliteDirectory {
  /// Open (or create) a directory at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let directory = Self { conn };
    directory.init_schema().await?;
    Ok(directory)
  }

  /// Open an in-memory directory, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let directory = Self { conn };
    directory.init_schema().await?;
    Ok(directory)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(METADATA_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// A rate limiter storing its buckets in this database.
  pub fn rate_limiter(&self) -> RateLimiter { RateLimiter::new(self.conn.clone()) }

  async fn fetch(&self, id: Uuid) -> Result<Option<World>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawWorld> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {WORLD_COLUMNS} FROM worlds WHERE id = ?1"),
              rusqlite::params![id_str],
              RawWorld::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawWorld::into_world).transpose()
  }
}

impl WorldDirectory for SqliteDirectory {
  type Error = crate::Error;

  async fn create_world(&self, input: NewWorld) -> Result<World> {
    let now = Utc::now();
    let world = World {
      id:              Uuid::new_v4(),
      organization_id: input.organization_id,
      label:           input.label,
      description:     input.description,
      shard_locator:   None,
      created_at:      now,
      updated_at:      now,
      deleted_at:      None,
    };

    let id_str      = encode_uuid(world.id);
    let org         = world.organization_id.clone();
    let label       = world.label.clone();
    let description = world.description.clone();
    let at_str      = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO worlds (id, organization_id, label, description, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
          rusqlite::params![id_str, org, label, description, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(world)
  }

  async fn get_world(&self, id: Uuid) -> Result<Option<World>> { self.fetch(id).await }

  async fn list_worlds(&self, organization_id: &str) -> Result<Vec<World>> {
    let org = organization_id.to_owned();
    let raws: Vec<RawWorld> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {WORLD_COLUMNS} FROM worlds
           WHERE organization_id = ?1 AND deleted_at IS NULL
           ORDER BY created_at, id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![org], RawWorld::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawWorld::into_world).collect()
  }

  async fn update_world(&self, id: Uuid, update: WorldUpdate) -> Result<Option<World>> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE worlds SET
             label       = COALESCE(?2, label),
             description = COALESCE(?3, description),
             updated_at  = ?4
           WHERE id = ?1",
          rusqlite::params![id_str, update.label, update.description, at_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Ok(None);
    }
    self.fetch(id).await
  }

  async fn set_shard_locator(&self, id: Uuid, locator: Option<ShardLocator>) -> Result<()> {
    let id_str      = encode_uuid(id);
    let locator_str = locator.as_ref().map(encode_locator).transpose()?;
    let at_str      = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE worlds SET shard_locator = ?2, updated_at = ?3 WHERE id = ?1",
          rusqlite::params![id_str, locator_str, at_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(crate::Error::WorldNotFound(id));
    }
    Ok(())
  }

  async fn soft_delete_world(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE worlds SET deleted_at = ?2, updated_at = ?2
           WHERE id = ?1 AND deleted_at IS NULL",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn purge_world(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM worlds WHERE id = ?1", rusqlite::params![id_str])?)
      })
      .await?;
    Ok(changed > 0)
  }
}
