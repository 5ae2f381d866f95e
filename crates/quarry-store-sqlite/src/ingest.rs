//! [`IngestionPipeline`]: applies RDF patches to a world's shard.
//!
//! Every embedding a patch needs is computed before anything is written, and
//! the patch is then written in one transaction. A provider failure therefore
//! aborts the patch with the shard untouched, and a triple is never visible
//! without its chunks.

use std::sync::Arc;

use quarry_core::{
  chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, TextChunk, TextSplitter},
  directory::WorldDirectory,
  embed::Embeddings,
  rdf::{Chunk, Patch, Quad, Triple, chunk_id},
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RowReader, encode_vector, parse_chunk, parse_triple},
  manager::ShardManager,
  shard::Stmt,
};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  pub chunk_size:    usize,
  pub chunk_overlap: usize,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self { chunk_size: DEFAULT_CHUNK_SIZE, chunk_overlap: DEFAULT_CHUNK_OVERLAP }
  }
}

impl IngestConfig {
  pub fn splitter(&self) -> Result<TextSplitter> {
    Ok(TextSplitter::new(self.chunk_size, self.chunk_overlap)?)
  }
}

pub struct IngestionPipeline<D, E> {
  shards:     Arc<ShardManager<D>>,
  embeddings: Arc<E>,
  splitter:   TextSplitter,
}

impl<D: WorldDirectory, E: Embeddings> IngestionPipeline<D, E> {
  pub fn new(
    shards: Arc<ShardManager<D>>,
    embeddings: Arc<E>,
    config: &IngestConfig,
  ) -> Result<Self> {
    Ok(Self { shards, embeddings, splitter: config.splitter()? })
  }

  /// Apply `patches` to the shard of `world_id`, in order.
  ///
  /// Each patch is atomic. On failure the error is returned immediately;
  /// patches before the failing one stay applied, later ones are not tried.
  pub async fn apply(&self, world_id: Uuid, patches: &[Patch]) -> Result<()> {
    if patches.iter().all(Patch::is_empty) {
      return Ok(());
    }
    let shard = self.shards.get(world_id).await?;

    for (index, patch) in patches.iter().enumerate() {
      let stmts = self.plan(patch).await?;
      shard.transaction(stmts).await?;
      debug!(
        %world_id,
        patch = index,
        insertions = patch.insertions.len(),
        deletions = patch.deletions.len(),
        "applied patch"
      );
    }
    info!(%world_id, patches = patches.len(), "ingested patches");
    Ok(())
  }

  /// Start accumulating patches for `world_id`.
  pub fn buffer(&self, world_id: Uuid) -> PatchBuffer<'_, D, E> {
    PatchBuffer { pipeline: self, world_id, pending: Vec::new() }
  }

  /// The statements that apply `patch`: deletions first, then insertions.
  async fn plan(&self, patch: &Patch) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();

    for quad in &patch.deletions {
      let triple_id = quad.triple_id();
      stmts.push(Stmt::new("DELETE FROM chunks WHERE triple_id = ?1").bind(triple_id.clone()));
      stmts.push(Stmt::new("DELETE FROM triples WHERE id = ?1").bind(triple_id));
    }

    for quad in &patch.insertions {
      let triple_id = quad.triple_id();
      let chunks = match quad.object_text() {
        Some(text) => self.embed_chunks(text).await?,
        None => vec![],
      };
      self.push_insert(&mut stmts, quad, &triple_id, chunks);
    }

    Ok(stmts)
  }

  fn push_insert(
    &self,
    stmts: &mut Vec<Stmt>,
    quad: &Quad,
    triple_id: &str,
    chunks: Vec<(TextChunk, Vec<f32>)>,
  ) {
    let subject = quad.stored_subject();
    let predicate = quad.predicate.value().to_owned();

    stmts.push(
      Stmt::new(
        "INSERT INTO triples (id, subject, predicate, object) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
           subject   = excluded.subject,
           predicate = excluded.predicate,
           object    = excluded.object",
      )
      .bind(triple_id.to_owned())
      .bind(subject.clone())
      .bind(predicate.clone())
      .bind(quad.stored_object()),
    );

    // Regenerate the chunk set wholesale so it always matches the triple.
    stmts.push(Stmt::new("DELETE FROM chunks WHERE triple_id = ?1").bind(triple_id.to_owned()));
    for (chunk, vector) in chunks {
      stmts.push(
        Stmt::new(
          "INSERT INTO chunks (id, triple_id, subject, predicate, text, vector)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(chunk_id(triple_id, chunk.index))
        .bind(triple_id.to_owned())
        .bind(subject.clone())
        .bind(predicate.clone())
        .bind(chunk.text)
        .bind(encode_vector(&vector)),
      );
    }
  }

  /// Split `text` and embed each piece. The whole text is embedded first;
  /// when it fits in one chunk that embedding is reused.
  async fn embed_chunks(&self, text: &str) -> Result<Vec<(TextChunk, Vec<f32>)>> {
    let whole = self.embed(text).await?;
    let mut pieces = self.splitter.split(text);
    if pieces.len() <= 1 {
      return Ok(pieces.pop().map(|piece| (piece, whole)).into_iter().collect());
    }

    let mut out = Vec::with_capacity(pieces.len());
    for piece in pieces {
      let vector = self.embed(&piece.text).await?;
      out.push((piece, vector));
    }
    Ok(out)
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>> {
    let vector = self.embeddings.embed(text).await.map_err(Error::embedding)?;
    let expected = self.shards.dimensions();
    if vector.len() != expected {
      return Err(Error::DimensionMismatch { expected, actual: vector.len() });
    }
    Ok(vector)
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  pub async fn triple_count(&self, world_id: Uuid) -> Result<u64> {
    let shard = self.shards.get(world_id).await?;
    let rows = shard.query(Stmt::new("SELECT COUNT(*) FROM triples")).await?;
    let row = rows
      .first()
      .ok_or_else(|| Error::MalformedRow("COUNT returned no row".into()))?;
    let count = RowReader::new("triples", row, 1)?.integer(0)?;
    Ok(count.max(0) as u64)
  }

  pub async fn get_triple(&self, world_id: Uuid, triple_id: &str) -> Result<Option<Triple>> {
    let shard = self.shards.get(world_id).await?;
    let rows = shard
      .query(
        Stmt::new("SELECT id, subject, predicate, object FROM triples WHERE id = ?1")
          .bind(triple_id.to_owned()),
      )
      .await?;
    rows.first().map(|row| parse_triple(row)).transpose()
  }

  /// Chunks of one triple in the order they were cut.
  pub async fn chunks_for_triple(&self, world_id: Uuid, triple_id: &str) -> Result<Vec<Chunk>> {
    let shard = self.shards.get(world_id).await?;
    let rows = shard
      .query(
        Stmt::new(
          "SELECT id, triple_id, subject, predicate, text, vector
           FROM chunks WHERE triple_id = ?1 ORDER BY rowid",
        )
        .bind(triple_id.to_owned()),
      )
      .await?;
    rows.iter().map(|row| parse_chunk(row)).collect()
  }
}

// ─── Buffering ───────────────────────────────────────────────────────────────

/// Accumulates patches in memory and writes them on [`PatchBuffer::commit`].
pub struct PatchBuffer<'a, D, E> {
  pipeline: &'a IngestionPipeline<D, E>,
  world_id: Uuid,
  pending:  Vec<Patch>,
}

impl<D: WorldDirectory, E: Embeddings> PatchBuffer<'_, D, E> {
  pub fn push(&mut self, patch: Patch) { self.pending.push(patch); }

  pub fn len(&self) -> usize { self.pending.len() }

  pub fn is_empty(&self) -> bool { self.pending.is_empty() }

  /// Apply everything pushed so far. The buffer is cleared only if all of it
  /// was applied; committing an empty buffer does nothing.
  pub async fn commit(&mut self) -> Result<()> {
    if self.pending.is_empty() {
      return Ok(());
    }
    self.pipeline.apply(self.world_id, &self.pending).await?;
    self.pending.clear();
    Ok(())
  }
}
