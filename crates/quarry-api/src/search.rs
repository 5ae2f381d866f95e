//! Handler for `POST /search`.
//!
//! When `world_ids` is omitted the search covers every live world of
//! `organization_id`.

use axum::{Json, extract::State};
use quarry_core::{
  directory::WorldDirectory,
  embed::Embeddings,
  search::{SearchHit, SearchRequest},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, Identity, error::ApiError};

#[derive(Debug, Deserialize, Default)]
pub struct SearchBody {
  pub query:           String,
  /// Explicit target worlds. Takes precedence over `organization_id`.
  pub world_ids:       Option<Vec<Uuid>>,
  pub organization_id: Option<String>,
  #[serde(default)]
  pub subjects:        Vec<String>,
  #[serde(default)]
  pub predicates:      Vec<String>,
  pub limit:           Option<usize>,
}

/// `POST /search`
pub async fn handler<D, E>(
  State(state): State<AppState<D, E>>,
  identity: Identity,
  Json(body): Json<SearchBody>,
) -> Result<Json<Vec<SearchHit>>, ApiError>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  state.admit(&identity, "search").await?;
  if body.query.trim().is_empty() {
    return Err(ApiError::BadRequest("query must not be empty".into()));
  }

  let world_ids = match (body.world_ids, body.organization_id) {
    (Some(ids), _) => ids,
    (None, Some(org)) => state
      .directory
      .list_worlds(&org)
      .await
      .map_err(ApiError::directory)?
      .into_iter()
      .map(|w| w.id)
      .collect(),
    (None, None) => {
      return Err(ApiError::BadRequest(
        "either world_ids or organization_id is required".into(),
      ));
    }
  };

  let request = SearchRequest {
    query: body.query,
    world_ids,
    subjects: body.subjects,
    predicates: body.predicates,
    limit: body.limit.unwrap_or(0),
  };
  let hits = state.search.search(&request).await?;
  Ok(Json(hits))
}
