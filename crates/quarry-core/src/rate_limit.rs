//! Token-bucket arithmetic for per-identity rate limiting.
//!
//! Storage lives elsewhere; this module only decides, given the stored bucket
//! (if any) and the current time, whether a request is admitted and what the
//! bucket should become.

use serde::{Deserialize, Serialize};

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
  /// Always within `[0, limit]`.
  pub tokens:         f64,
  pub last_refill_ms: i64,
}

/// Outcome of a rate-limit check, carrying everything a client needs to back
/// off correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
  pub allowed:     bool,
  pub limit:       u32,
  pub remaining:   u32,
  pub reset_at_ms: i64,
}

impl RateLimitDecision {
  /// Decision handed to privileged identities, which are never limited.
  pub fn unlimited(limit: u32, now_ms: i64, period_ms: i64) -> Self {
    Self { allowed: true, limit, remaining: limit, reset_at_ms: now_ms + period_ms }
  }
}

/// Bucket key for an identity and feature.
pub fn bucket_key(identity: &str, feature: &str) -> String { format!("{identity}:{feature}") }

/// Refill `stored` up to `now_ms` and try to take one token.
///
/// Returns the decision and, when a token was consumed, the bucket state to
/// persist. A denied request leaves the stored bucket untouched.
pub fn evaluate(
  stored: Option<TokenBucket>,
  limit: u32,
  period_ms: i64,
  now_ms: i64,
) -> (RateLimitDecision, Option<TokenBucket>) {
  let capacity = f64::from(limit);
  let bucket = stored.unwrap_or(TokenBucket { tokens: capacity, last_refill_ms: now_ms });

  let tokens = if period_ms <= 0 {
    capacity
  } else {
    let elapsed_ms = (now_ms - bucket.last_refill_ms).max(0) as f64;
    (bucket.tokens + elapsed_ms * capacity / period_ms as f64).min(capacity)
  };

  if tokens >= 1.0 {
    let remaining = (tokens.floor() as u32).saturating_sub(1);
    let decision = RateLimitDecision {
      allowed: true,
      limit,
      remaining,
      reset_at_ms: now_ms + period_ms,
    };
    let next = TokenBucket { tokens: tokens - 1.0, last_refill_ms: now_ms };
    (decision, Some(next))
  } else {
    let decision = RateLimitDecision {
      allowed: false,
      limit,
      remaining: 0,
      reset_at_ms: bucket.last_refill_ms + period_ms,
    };
    (decision, None)
  }
}
