//! JSON REST API for Quarry.
//!
//! Exposes an axum [`Router`] over a world directory, the shard manager, the
//! ingestion pipeline, and the hybrid search engine. Every endpoint is rate
//! limited per caller identity and feature.
//!
//! Authentication happens upstream: the caller's identity arrives in the
//! `x-quarry-identity` header.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/v1", quarry_api::api_router(state))
//! ```

pub mod error;
pub mod identity;
pub mod patches;
pub mod search;
pub mod worlds;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use quarry_core::{directory::WorldDirectory, embed::Embeddings};
use quarry_store_sqlite::{HybridSearchEngine, IngestionPipeline, RateLimiter, ShardManager};
use serde::Deserialize;

pub use error::ApiError;
pub use identity::Identity;

// ─── Rate limits ─────────────────────────────────────────────────────────────

/// Bucket parameters applied to every feature.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimits {
  pub limit:     u32,
  pub period_ms: i64,
}

impl Default for RateLimits {
  fn default() -> Self { Self { limit: 100, period_ms: 60_000 } }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<D, E> {
  pub directory: Arc<D>,
  pub shards:    Arc<ShardManager<D>>,
  pub ingest:    Arc<IngestionPipeline<D, E>>,
  pub search:    Arc<HybridSearchEngine<D, E>>,
  pub limiter:   RateLimiter,
  pub limits:    RateLimits,
}

impl<D, E> Clone for AppState<D, E> {
  fn clone(&self) -> Self {
    Self {
      directory: Arc::clone(&self.directory),
      shards:    Arc::clone(&self.shards),
      ingest:    Arc::clone(&self.ingest),
      search:    Arc::clone(&self.search),
      limiter:   self.limiter.clone(),
      limits:    self.limits,
    }
  }
}

impl<D, E> AppState<D, E> {
  /// Spend one token of `identity`'s `feature` bucket.
  pub async fn admit(&self, identity: &Identity, feature: &str) -> Result<(), ApiError> {
    let decision = self
      .limiter
      .check(identity.as_str(), feature, self.limits.limit, self.limits.period_ms)
      .await?;
    if !decision.allowed {
      tracing::debug!(identity = identity.as_str(), feature, "rate limited");
      return Err(ApiError::RateLimited(decision));
    }
    Ok(())
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
pub fn api_router<D, E>(state: AppState<D, E>) -> Router<()>
where
  D: WorldDirectory + 'static,
  E: Embeddings + 'static,
{
  Router::new()
    // Worlds
    .route("/worlds", get(worlds::list::<D, E>).post(worlds::create::<D, E>))
    .route(
      "/worlds/{id}",
      get(worlds::get_one::<D, E>)
        .patch(worlds::update::<D, E>)
        .delete(worlds::delete::<D, E>),
    )
    .route("/worlds/{id}/stats", get(worlds::stats::<D, E>))
    // Ingestion
    .route("/worlds/{id}/patches", post(patches::apply::<D, E>))
    // Search
    .route("/search", post(search::handler::<D, E>))
    .with_state(state)
}
