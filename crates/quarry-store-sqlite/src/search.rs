//! [`HybridSearchEngine`]: vector + full-text search across worlds.
//!
//! Each target world is queried concurrently with its own timeout. Inside a
//! shard one statement produces both candidate rankings (cosine distance and
//! BM25), each capped at `limit`; the two ranks are fused here with
//! reciprocal rank fusion. A world whose shard cannot be resolved or queried
//! contributes nothing and is logged.

use std::{sync::Arc, time::Duration};

use quarry_core::{
  directory::WorldDirectory,
  embed::Embeddings,
  search::{
    DEFAULT_RRF_K, SearchHit, SearchRequest, fused_score, merge_world_results, rank_and_truncate,
  },
};
use rusqlite::types::Value;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RowReader, encode_vector},
  manager::ShardManager,
  shard::Stmt,
};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  pub default_limit:    usize,
  pub max_limit:        usize,
  pub shard_timeout_ms: u64,
  pub rrf_k:            f64,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      default_limit:    10,
      max_limit:        100,
      shard_timeout_ms: 5_000,
      rrf_k:            DEFAULT_RRF_K,
    }
  }
}

impl SearchConfig {
  /// The effective limit for a request; zero selects the default.
  pub fn clamp_limit(&self, requested: usize) -> usize {
    let limit = if requested == 0 { self.default_limit } else { requested };
    limit.clamp(1, self.max_limit.max(1))
  }
}

pub struct HybridSearchEngine<D, E> {
  shards:     Arc<ShardManager<D>>,
  embeddings: Arc<E>,
  config:     SearchConfig,
}

impl<D, E> HybridSearchEngine<D, E>
where
  D: WorldDirectory + 'static,
  E: Embeddings,
{
  pub fn new(shards: Arc<ShardManager<D>>, embeddings: Arc<E>, config: SearchConfig) -> Self {
    Self { shards, embeddings, config }
  }

  pub fn config(&self) -> &SearchConfig { &self.config }

  pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
    if request.world_ids.is_empty() {
      return Ok(vec![]);
    }
    let limit = self.config.clamp_limit(request.limit);

    let embedding = self
      .embeddings
      .embed(&request.query)
      .await
      .map_err(Error::embedding)?;
    let expected = self.shards.dimensions();
    if embedding.len() != expected {
      return Err(Error::DimensionMismatch { expected, actual: embedding.len() });
    }

    let query = Arc::new(ShardQuery {
      vector: encode_vector(&embedding),
      fts: fts_query(&request.query),
      subjects: json_filter(&request.subjects)?,
      predicates: json_filter(&request.predicates)?,
      limit,
      rrf_k: self.config.rrf_k,
    });
    let timeout = Duration::from_millis(self.config.shard_timeout_ms);

    let mut tasks = JoinSet::new();
    for (position, &world_id) in request.world_ids.iter().enumerate() {
      let shards = Arc::clone(&self.shards);
      let query = Arc::clone(&query);
      tasks.spawn(async move {
        let outcome = match tokio::time::timeout(timeout, query.run(&shards, world_id)).await {
          Ok(Ok(hits)) => Ok(hits),
          Ok(Err(e)) => Err(Error::SearchShardUnavailable { world_id, reason: e.to_string() }),
          Err(_) => Err(Error::SearchShardUnavailable {
            world_id,
            reason: format!("timed out after {}ms", timeout.as_millis()),
          }),
        };
        (position, outcome)
      });
    }

    let mut per_world = vec![Vec::new(); request.world_ids.len()];
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((position, Ok(hits))) => per_world[position] = hits,
        Ok((_, Err(e))) => warn!(error = %e, "skipping world in search"),
        Err(e) => warn!(error = %e, "search task failed"),
      }
    }

    let hits = merge_world_results(per_world, limit);
    debug!(worlds = request.world_ids.len(), hits = hits.len(), "search complete");
    Ok(hits)
  }
}

// ─── Per-shard query ─────────────────────────────────────────────────────────

struct ShardQuery {
  vector:     Vec<u8>,
  fts:        Option<String>,
  subjects:   Value,
  predicates: Value,
  limit:      usize,
  rrf_k:      f64,
}

const VEC_CANDIDATES: &str = "
  SELECT chunk_id, row_number() OVER (ORDER BY distance) AS rank_number
  FROM (
    SELECT id AS chunk_id, vector_distance_cos(vector, ?1) AS distance
    FROM chunks
    WHERE (?2 IS NULL OR subject IN (SELECT value FROM json_each(?2)))
      AND (?3 IS NULL OR predicate IN (SELECT value FROM json_each(?3)))
    ORDER BY distance
    LIMIT ?4
  )";

const FTS_CANDIDATES: &str = "
  SELECT chunk_id, row_number() OVER (ORDER BY score) AS rank_number
  FROM (
    SELECT c.id AS chunk_id, bm25(chunks_fts) AS score
    FROM chunks_fts
    JOIN chunks c ON c.rowid = chunks_fts.rowid
    WHERE chunks_fts MATCH ?5
      AND (?2 IS NULL OR c.subject IN (SELECT value FROM json_each(?2)))
      AND (?3 IS NULL OR c.predicate IN (SELECT value FROM json_each(?3)))
    ORDER BY score
    LIMIT ?4
  )";

const NO_FTS_CANDIDATES: &str = "
  SELECT NULL AS chunk_id, NULL AS rank_number WHERE 0";

const FUSE: &str = "
SELECT c.subject, c.predicate, t.object, c.text, v.rank_number, f.rank_number
FROM (SELECT chunk_id FROM vec UNION SELECT chunk_id FROM fts) AS candidates
JOIN chunks c  ON c.id = candidates.chunk_id
JOIN triples t ON t.id = c.triple_id
LEFT JOIN vec v ON v.chunk_id = candidates.chunk_id
LEFT JOIN fts f ON f.chunk_id = candidates.chunk_id";

impl ShardQuery {
  fn statement(&self) -> Stmt {
    let fts = if self.fts.is_some() { FTS_CANDIDATES } else { NO_FTS_CANDIDATES };
    let sql = format!("WITH vec AS ({VEC_CANDIDATES}\n),\nfts AS ({fts}\n){FUSE}");

    let stmt = Stmt::new(sql)
      .bind(self.vector.clone())
      .bind(self.subjects.clone())
      .bind(self.predicates.clone())
      .bind(self.limit as i64);
    match &self.fts {
      Some(fts) => stmt.bind(fts.clone()),
      None => stmt,
    }
  }

  async fn run<D: WorldDirectory>(
    &self,
    shards: &ShardManager<D>,
    world_id: Uuid,
  ) -> Result<Vec<SearchHit>> {
    let shard = shards.get(world_id).await?;
    let rows = shard.query(self.statement()).await?;

    let mut hits = Vec::with_capacity(rows.len());
    for row in &rows {
      let r = RowReader::new("search", row, 6)?;
      let vec_rank = r.opt_rank(4)?;
      let fts_rank = r.opt_rank(5)?;
      hits.push(SearchHit {
        subject: r.text(0)?,
        predicate: r.text(1)?,
        object: r.text(2)?,
        text: r.text(3)?,
        vec_rank,
        fts_rank,
        score: fused_score(vec_rank, fts_rank, self.rrf_k),
        world_id,
      });
    }
    Ok(rank_and_truncate(hits, self.limit))
  }
}

/// Turn free text into an FTS5 expression matching any of its words. Each
/// word is quoted so FTS5 operators and punctuation in user input are inert.
/// `None` when the text has no searchable words.
pub(crate) fn fts_query(query: &str) -> Option<String> {
  let terms: Vec<String> = query
    .split_whitespace()
    .filter(|tok| tok.chars().any(char::is_alphanumeric))
    .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
    .collect();
  (!terms.is_empty()).then(|| terms.join(" OR "))
}

/// A JSON array parameter for `json_each`, or NULL to disable the filter.
fn json_filter(values: &[String]) -> Result<Value> {
  if values.is_empty() {
    return Ok(Value::Null);
  }
  Ok(Value::Text(serde_json::to_string(values)?))
}
