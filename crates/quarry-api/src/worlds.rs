//! Handlers for `/worlds` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/worlds` | Body: `{"organization_id":"..","label":".."}`; provisions the shard |
//! | `GET`    | `/worlds` | Required `?organization_id=` |
//! | `GET`    | `/worlds/:id` | 404 if absent or soft-deleted |
//! | `PATCH`  | `/worlds/:id` | Body: `{"label":"..","description":".."}` |
//! | `DELETE` | `/worlds/:id` | Soft delete; `?hard=true` also destroys the shard |
//! | `GET`    | `/worlds/:id/stats` | Triple count |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use quarry_core::{
  directory::WorldDirectory,
  embed::Embeddings,
  world::{NewWorld, World, WorldUpdate},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{AppState, Identity, error::ApiError};

const FEATURE: &str = "worlds";

/// Fetch a live world or fail with 404.
pub(crate) async fn live_world<D, E>(state: &AppState<D, E>, id: Uuid) -> Result<World, ApiError>
where
  D: WorldDirectory,
{
  state
    .directory
    .get_world(id)
    .await
    .map_err(ApiError::directory)?
    .filter(|w| !w.is_deleted())
    .ok_or_else(|| ApiError::NotFound(format!("world {id} not found")))
}

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /worlds`
pub async fn create<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Json(body): Json<NewWorld>,
) -> Result<impl IntoResponse, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;
  if body.label.trim().is_empty() {
    return Err(ApiError::BadRequest("label must not be empty".into()));
  }
  if body.organization_id.trim().is_empty() {
    return Err(ApiError::BadRequest("organization_id must not be empty".into()));
  }

  let world = state
    .directory
    .create_world(body)
    .await
    .map_err(ApiError::directory)?;

  if let Err(e) = state.shards.create(world.id).await {
    // A world without storage must not stay listed.
    if let Err(purge) = state.directory.purge_world(world.id).await {
      warn!(world_id = %world.id, error = %purge, "failed to roll back world");
    }
    return Err(e.into());
  }

  info!(world_id = %world.id, organization_id = %world.organization_id, "created world");
  Ok((StatusCode::CREATED, Json(world)))
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub organization_id: String,
}

/// `GET /worlds?organization_id=<org>`
pub async fn list<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<World>>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;
  let worlds = state
    .directory
    .list_worlds(&params.organization_id)
    .await
    .map_err(ApiError::directory)?;
  Ok(Json(worlds))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /worlds/:id`
pub async fn get_one<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<World>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;
  Ok(Json(live_world(&state, id).await?))
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// `PATCH /worlds/:id`
pub async fn update<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<WorldUpdate>,
) -> Result<Json<World>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;
  if body.label.as_deref().is_some_and(|l| l.trim().is_empty()) {
    return Err(ApiError::BadRequest("label must not be empty".into()));
  }
  live_world(&state, id).await?;

  let world = state
    .directory
    .update_world(id, body)
    .await
    .map_err(ApiError::directory)?
    .ok_or_else(|| ApiError::NotFound(format!("world {id} not found")))?;
  Ok(Json(world))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
  #[serde(default)]
  pub hard: bool,
}

/// `DELETE /worlds/:id[?hard=true]`
///
/// A soft delete hides the world and keeps its shard. A hard delete destroys
/// the shard and then the metadata; it also works on already soft-deleted
/// worlds.
pub async fn delete<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;

  if params.hard {
    state
      .directory
      .get_world(id)
      .await
      .map_err(ApiError::directory)?
      .ok_or_else(|| ApiError::NotFound(format!("world {id} not found")))?;
    state.shards.delete(id).await?;
    state.directory.purge_world(id).await.map_err(ApiError::directory)?;
    info!(world_id = %id, "hard-deleted world");
  } else {
    let deleted = state
      .directory
      .soft_delete_world(id)
      .await
      .map_err(ApiError::directory)?;
    if !deleted {
      return Err(ApiError::NotFound(format!("world {id} not found")));
    }
    state.shards.evict(id);
    info!(world_id = %id, "soft-deleted world");
  }
  Ok(StatusCode::NO_CONTENT)
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct WorldStats {
  pub world_id: Uuid,
  pub triples:  u64,
}

/// `GET /worlds/:id/stats`
pub async fn stats<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Path(id): Path<Uuid>,
) -> Result<Json<WorldStats>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, FEATURE).await?;
  live_world(&state, id).await?;
  let triples = state.ingest.triple_count(id).await?;
  Ok(Json(WorldStats { world_id: id, triples }))
}
