//! [`RateLimiter`]: token buckets persisted in the metadata database.
//!
//! Each check is one `BEGIN IMMEDIATE` read-modify-write on the bucket row,
//! so concurrent requests can never both spend the same token.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use quarry_core::rate_limit::{RateLimitDecision, TokenBucket, bucket_key, evaluate};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::debug;

use crate::Result;

#[derive(Clone)]
pub struct RateLimiter {
  conn:       tokio_rusqlite::Connection,
  privileged: Arc<HashSet<String>>,
}

impl RateLimiter {
  pub fn new(conn: tokio_rusqlite::Connection) -> Self {
    Self { conn, privileged: Arc::new(HashSet::new()) }
  }

  /// Identities that bypass rate limiting entirely.
  pub fn with_privileged(mut self, identities: impl IntoIterator<Item = String>) -> Self {
    self.privileged = Arc::new(identities.into_iter().collect());
    self
  }

  pub fn is_privileged(&self, identity: &str) -> bool { self.privileged.contains(identity) }

  /// Check and consume one token for `identity` using `feature`'s bucket.
  pub async fn check(
    &self,
    identity: &str,
    feature: &str,
    limit: u32,
    period_ms: i64,
  ) -> Result<RateLimitDecision> {
    let now_ms = Utc::now().timestamp_millis();
    if self.is_privileged(identity) {
      return Ok(RateLimitDecision::unlimited(limit, now_ms, period_ms));
    }
    self.check_limit_at(&bucket_key(identity, feature), limit, period_ms, now_ms).await
  }

  pub async fn check_limit(
    &self,
    key: &str,
    limit: u32,
    period_ms: i64,
  ) -> Result<RateLimitDecision> {
    self
      .check_limit_at(key, limit, period_ms, Utc::now().timestamp_millis())
      .await
  }

  /// [`RateLimiter::check_limit`] with an explicit clock.
  pub async fn check_limit_at(
    &self,
    key: &str,
    limit: u32,
    period_ms: i64,
    now_ms: i64,
  ) -> Result<RateLimitDecision> {
    let key = key.to_owned();
    let decision = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = tx
          .query_row(
            "SELECT tokens, last_refill FROM rate_limits WHERE key = ?1",
            rusqlite::params![key],
            |row| {
              Ok(TokenBucket {
                tokens:         row.get(0)?,
                last_refill_ms: row.get(1)?,
              })
            },
          )
          .optional()?;

        let (decision, next) = evaluate(stored, limit, period_ms, now_ms);
        if let Some(bucket) = next {
          tx.execute(
            "INSERT INTO rate_limits (key, tokens, last_refill) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               tokens      = excluded.tokens,
               last_refill = excluded.last_refill",
            rusqlite::params![key, bucket.tokens, bucket.last_refill_ms],
          )?;
        }
        tx.commit()?;
        Ok(decision)
      })
      .await?;

    debug!(
      allowed = decision.allowed,
      remaining = decision.remaining,
      "rate limit check"
    );
    Ok(decision)
  }
}
