//! The `WorldDirectory` trait, the tenant metadata store.
//!
//! The directory is the source of truth for which worlds exist, which
//! organization owns them, and where each world's shard lives. The shard
//! manager persists resolved locations back into it.

use std::future::Future;

use uuid::Uuid;

use crate::world::{NewWorld, ShardLocator, World, WorldUpdate};

pub trait WorldDirectory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Create and persist a world with no shard locator yet.
  fn create_world(
    &self,
    input: NewWorld,
  ) -> impl Future<Output = Result<World, Self::Error>> + Send + '_;

  /// Retrieve a world by id, including soft-deleted ones. `None` if absent.
  fn get_world(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<World>, Self::Error>> + Send + '_;

  /// All live (not soft-deleted) worlds of an organization, oldest first.
  fn list_worlds<'a>(
    &'a self,
    organization_id: &'a str,
  ) -> impl Future<Output = Result<Vec<World>, Self::Error>> + Send + 'a;

  /// Apply a metadata update and bump `updated_at`. `None` if absent.
  fn update_world(
    &self,
    id: Uuid,
    update: WorldUpdate,
  ) -> impl Future<Output = Result<Option<World>, Self::Error>> + Send + '_;

  /// Record (or clear) the location of a world's shard.
  fn set_shard_locator(
    &self,
    id: Uuid,
    locator: Option<ShardLocator>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Mark a world deleted without touching its shard.
  fn soft_delete_world(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Remove the world's metadata row entirely.
  fn purge_world(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
