//! Handler for `POST /worlds/:id/patches`.
//!
//! Body: `{"patches":[{"insertions":[..],"deletions":[..]}, ..]}`. Patches are
//! applied in order; a failure stops at the failing patch.

use axum::{
  Json,
  extract::{Path, State},
};
use quarry_core::{directory::WorldDirectory, embed::Embeddings, rdf::Patch};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, Identity, error::ApiError, worlds::live_world};

#[derive(Debug, Deserialize)]
pub struct ApplyBody {
  pub patches: Vec<Patch>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
  pub applied:    usize,
  pub insertions: usize,
  pub deletions:  usize,
}

/// `POST /worlds/:id/patches`
pub async fn apply<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Path(id): Path<Uuid>,
  Json(body): Json<ApplyBody>,
) -> Result<Json<ApplyResponse>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, "patches").await?;
  live_world(&state, id).await?;

  state.ingest.apply(id, &body.patches).await?;

  Ok(Json(ApplyResponse {
    applied:    body.patches.len(),
    insertions: body.patches.iter().map(|p| p.insertions.len()).sum(),
    deletions:  body.patches.iter().map(|p| p.deletions.len()).sum(),
  }))
}
