//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use quarry_core::rate_limit::RateLimitDecision;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("missing caller identity")]
  Unauthorized,

  #[error("rate limit exceeded")]
  RateLimited(RateLimitDecision),

  /// The embedding provider or the shard hosting platform failed.
  #[error("upstream error: {0}")]
  Upstream(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  pub(crate) fn directory(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

impl From<quarry_store_sqlite::Error> for ApiError {
  fn from(e: quarry_store_sqlite::Error) -> Self {
    use quarry_store_sqlite::Error as E;
    match e {
      E::WorldNotFound(id) => Self::NotFound(format!("world {id} not found")),
      E::ShardNotFound(id) => Self::NotFound(format!("world {id} has no shard")),
      E::Embedding(_) | E::ShardProvisioningFailed { .. } => Self::Upstream(e.to_string()),
      other => Self::Store(Box::new(other)),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
      ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
      ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };

    let mut response = (status, Json(json!({ "error": message }))).into_response();
    if let ApiError::RateLimited(decision) = &self {
      let headers = response.headers_mut();
      headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
      headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
      headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at_ms));
    }
    response
  }
}
