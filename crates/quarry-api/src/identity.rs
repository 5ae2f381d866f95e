//! Caller identity extractor.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Header carrying the authenticated caller, set by the upstream gateway.
pub const IDENTITY_HEADER: &str = "x-quarry-identity";

/// The caller a request is made on behalf of. Rejects with 401 when the
/// header is missing or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    parts
      .headers
      .get(IDENTITY_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(|v| Self(v.to_owned()))
      .ok_or(ApiError::Unauthorized)
  }
}
