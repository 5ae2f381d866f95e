//! Hybrid search request/response types, rank fusion, and cross-world merge.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default `k` for reciprocal rank fusion.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Parameters for one hybrid search call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
  pub query:      String,
  /// Worlds to search. An empty list yields no results.
  #[serde(default)]
  pub world_ids:  Vec<Uuid>,
  /// Restrict to chunks whose triple subject is one of these.
  #[serde(default)]
  pub subjects:   Vec<String>,
  /// Restrict to chunks whose triple predicate is one of these.
  #[serde(default)]
  pub predicates: Vec<String>,
  /// Zero means the configured default.
  #[serde(default)]
  pub limit:      usize,
}

/// One ranked match. `vec_rank` and `fts_rank` are 1-based positions in the
/// respective candidate lists; `None` means the chunk was absent from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
  pub subject:   String,
  pub predicate: String,
  pub object:    String,
  /// The chunk of `object` that matched.
  pub text:      String,
  pub vec_rank:  Option<u32>,
  pub fts_rank:  Option<u32>,
  pub score:     f64,
  pub world_id:  Uuid,
}

/// Reciprocal rank fusion of the two rankings.
///
/// Each side contributes `1 / (k + rank)`; a chunk found by both sides scores
/// strictly more than it would from either side alone.
pub fn fused_score(vec_rank: Option<u32>, fts_rank: Option<u32>, k: f64) -> f64 {
  let part = |rank: Option<u32>| rank.map_or(0.0, |r| 1.0 / (k + f64::from(r)));
  part(vec_rank) + part(fts_rank)
}

/// Sort hits by descending score and keep the best `limit`.
///
/// The sort is stable, so ties keep their input order.
pub fn rank_and_truncate(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
  hits.sort_by(|a, b| b.score.total_cmp(&a.score));
  hits.truncate(limit);
  hits
}

/// Merge per-world result lists into one global ranking.
pub fn merge_world_results(
  per_world: impl IntoIterator<Item = Vec<SearchHit>>,
  limit: usize,
) -> Vec<SearchHit> {
  rank_and_truncate(per_world.into_iter().flatten().collect(), limit)
}
