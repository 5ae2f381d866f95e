//! Integration tests for the store against in-memory and on-disk SQLite.

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::{Duration, Instant},
};

use quarry_core::{
  directory::WorldDirectory,
  embed::Embeddings,
  rdf::{Patch, Quad, SKOLEM_PREFIX, Term, chunk_id},
  search::SearchRequest,
  world::{NewWorld, ShardLocator, World, WorldUpdate},
};
use uuid::Uuid;

use crate::{
  Backend, BackendConfig, Error, HybridSearchEngine, IngestConfig, IngestionPipeline,
  SearchConfig, ShardManager, SqliteDirectory,
};

const DIMS: usize = 16;

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("embedding provider unavailable")]
struct ProviderDown;

/// Deterministic hashed bag-of-words embeddings. Texts containing `fail_on`
/// make the provider error.
#[derive(Default)]
struct TestEmbeddings {
  calls:   AtomicUsize,
  fail_on: Option<&'static str>,
}

impl TestEmbeddings {
  fn failing_on(word: &'static str) -> Self { Self { fail_on: Some(word), ..Self::default() } }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

fn bag_of_words(text: &str) -> Vec<f32> {
  let mut v = vec![0.0; DIMS];
  for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
    let h = word
      .to_lowercase()
      .bytes()
      .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3));
    v[(h % DIMS as u64) as usize] += 1.0;
  }
  v
}

impl Embeddings for TestEmbeddings {
  type Error = ProviderDown;

  fn dimensions(&self) -> usize { DIMS }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderDown> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_on.is_some_and(|w| text.contains(w)) {
      return Err(ProviderDown);
    }
    Ok(bag_of_words(text))
  }
}

struct Harness {
  directory:  Arc<SqliteDirectory>,
  shards:     Arc<ShardManager<SqliteDirectory>>,
  embeddings: Arc<TestEmbeddings>,
  ingest:     IngestionPipeline<SqliteDirectory, TestEmbeddings>,
  search:     HybridSearchEngine<SqliteDirectory, TestEmbeddings>,
}

async fn harness_with(
  directory: Arc<SqliteDirectory>,
  backend: BackendConfig,
  embeddings: TestEmbeddings,
  ingest: IngestConfig,
) -> Harness {
  let shards = Arc::new(ShardManager::new(
    Arc::clone(&directory),
    Backend::from_config(&backend),
    DIMS,
  ));
  let embeddings = Arc::new(embeddings);
  let ingest = IngestionPipeline::new(Arc::clone(&shards), Arc::clone(&embeddings), &ingest)
    .expect("ingest config");
  let search = HybridSearchEngine::new(
    Arc::clone(&shards),
    Arc::clone(&embeddings),
    SearchConfig::default(),
  );
  Harness { directory, shards, embeddings, ingest, search }
}

async fn harness() -> Harness {
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.expect("directory"));
  harness_with(
    directory,
    BackendConfig::Memory,
    TestEmbeddings::default(),
    IngestConfig::default(),
  )
  .await
}

fn new_world(org: &str, label: &str) -> NewWorld {
  NewWorld {
    organization_id: org.into(),
    label:           label.into(),
    description:     None,
  }
}

/// Create a world and provision its shard.
async fn world(h: &Harness, org: &str) -> Uuid {
  let world = h.directory.create_world(new_world(org, "test")).await.unwrap();
  h.shards.create(world.id).await.unwrap();
  world.id
}

fn iri(s: &str) -> Term { Term::iri(format!("http://ex.org/{s}")) }

fn text_quad(subject: &str, predicate: &str, text: &str) -> Quad {
  Quad::new(iri(subject), iri(predicate), Term::literal(text))
}

// ─── Directory ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_world() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let created = dir.create_world(new_world("acme", "Main")).await.unwrap();

  let fetched = dir.get_world(created.id).await.unwrap().unwrap();
  assert_eq!(fetched.organization_id, "acme");
  assert_eq!(fetched.label, "Main");
  assert!(fetched.shard_locator.is_none());
  assert!(!fetched.is_deleted());

  assert!(dir.get_world(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_worlds_excludes_other_orgs_and_deleted() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let a = dir.create_world(new_world("acme", "a")).await.unwrap();
  let b = dir.create_world(new_world("acme", "b")).await.unwrap();
  dir.create_world(new_world("other", "c")).await.unwrap();

  assert!(dir.soft_delete_world(b.id).await.unwrap());
  assert!(!dir.soft_delete_world(b.id).await.unwrap());

  let listed = dir.list_worlds("acme").await.unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0].id, a.id);

  // Soft-deleted worlds are still retrievable by id.
  assert!(dir.get_world(b.id).await.unwrap().unwrap().is_deleted());
}

#[tokio::test]
async fn update_world_touches_only_given_fields() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let mut input = new_world("acme", "before");
  input.description = Some("kept".into());
  let w = dir.create_world(input).await.unwrap();

  let updated = dir
    .update_world(w.id, WorldUpdate { label: Some("after".into()), description: None })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.label, "after");
  assert_eq!(updated.description.as_deref(), Some("kept"));
  assert!(updated.updated_at >= w.updated_at);

  let missing = dir.update_world(Uuid::new_v4(), WorldUpdate::default()).await.unwrap();
  assert!(missing.is_none());
}

#[tokio::test]
async fn purge_removes_world() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let w = dir.create_world(new_world("acme", "x")).await.unwrap();
  assert!(dir.purge_world(w.id).await.unwrap());
  assert!(dir.get_world(w.id).await.unwrap().is_none());
  assert!(!dir.purge_world(w.id).await.unwrap());
}

#[tokio::test]
async fn set_locator_on_missing_world_fails() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let err = dir
    .set_shard_locator(Uuid::new_v4(), Some(ShardLocator::Memory { name: "x".into() }))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::WorldNotFound(_)));
}

// ─── Shards ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_shard_records_locator_and_initialises() {
  let h = harness().await;
  let id = world(&h, "acme").await;

  assert!(h.shards.is_initialized(id));
  let w = h.directory.get_world(id).await.unwrap().unwrap();
  assert!(matches!(w.shard_locator, Some(ShardLocator::Memory { .. })));
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 0);
}

#[tokio::test]
async fn create_twice_returns_existing_shard() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  h.ingest
    .apply(id, &[Patch::insert([text_quad("s", "p", "hello")])])
    .await
    .unwrap();

  h.shards.create(id).await.unwrap();
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
}

#[tokio::test]
async fn create_for_unknown_world_fails() {
  let h = harness().await;
  let err = h.shards.create(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::WorldNotFound(_)));
}

#[tokio::test]
async fn get_without_shard_is_not_found() {
  let h = harness().await;
  let w = h.directory.create_world(new_world("acme", "bare")).await.unwrap();
  let err = h.shards.get(w.id).await.unwrap_err();
  assert!(matches!(err, Error::ShardNotFound(id) if id == w.id));
}

#[tokio::test]
async fn soft_deleted_world_has_no_shard() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  h.directory.soft_delete_world(id).await.unwrap();

  // A fresh manager has nothing cached for the world.
  let shards = ShardManager::new(
    Arc::clone(&h.directory),
    Backend::from_config(&BackendConfig::Memory),
    DIMS,
  );
  let err = shards.get(id).await.unwrap_err();
  assert!(matches!(err, Error::ShardNotFound(_)));
}

#[tokio::test]
async fn evicted_soft_deleted_world_is_unreachable() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  seed(&h, id).await;
  assert!(!h.search.search(&request("sourdough", vec![id])).await.unwrap().is_empty());

  h.directory.soft_delete_world(id).await.unwrap();
  h.shards.evict(id);

  assert!(!h.shards.is_initialized(id));
  assert!(matches!(h.shards.get(id).await.unwrap_err(), Error::ShardNotFound(_)));
  assert!(h.search.search(&request("sourdough", vec![id])).await.unwrap().is_empty());
  let err = h
    .ingest
    .apply(id, &[Patch::insert([text_quad("s", "p", "late")])])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ShardNotFound(_)));
}

#[tokio::test]
async fn delete_shard_clears_locator() {
  let h = harness().await;
  let id = world(&h, "acme").await;

  h.shards.delete(id).await.unwrap();
  assert!(!h.shards.is_initialized(id));
  let w = h.directory.get_world(id).await.unwrap().unwrap();
  assert!(w.shard_locator.is_none());
  assert!(matches!(h.shards.get(id).await.unwrap_err(), Error::ShardNotFound(_)));
}

#[tokio::test]
async fn concurrent_first_access_resolves_once() {
  let tmp = tempfile::tempdir().unwrap();
  let backend = BackendConfig::File { dir: tmp.path().to_path_buf() };
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    Arc::clone(&directory),
    backend.clone(),
    TestEmbeddings::default(),
    IngestConfig::default(),
  )
  .await;
  let id = world(&h, "acme").await;

  let fresh = ShardManager::new(directory, Backend::from_config(&backend), DIMS);
  assert!(!fresh.is_initialized(id));
  let (a, b) = tokio::join!(fresh.get(id), fresh.get(id));
  assert!(a.is_ok() && b.is_ok());
  assert!(fresh.is_initialized(id));
}

#[tokio::test]
async fn file_backend_resolves_and_deletes_files() {
  let tmp = tempfile::tempdir().unwrap();
  let backend = BackendConfig::File { dir: tmp.path().join("shards") };
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    Arc::clone(&directory),
    backend.clone(),
    TestEmbeddings::default(),
    IngestConfig::default(),
  )
  .await;

  let id = world(&h, "acme").await;
  h.ingest
    .apply(id, &[Patch::insert([text_quad("s", "p", "persisted text")])])
    .await
    .unwrap();

  let path = tmp.path().join("shards").join(format!("{}.db", id.simple()));
  assert!(path.exists());

  // Forget the location; a fresh manager finds the file through the backend
  // and records it again.
  directory.set_shard_locator(id, None).await.unwrap();
  let fresh = harness_with(
    Arc::clone(&directory),
    backend,
    TestEmbeddings::default(),
    IngestConfig::default(),
  )
  .await;
  assert_eq!(fresh.ingest.triple_count(id).await.unwrap(), 1);
  let w = directory.get_world(id).await.unwrap().unwrap();
  assert!(matches!(w.shard_locator, Some(ShardLocator::File { .. })));

  drop(h);
  fresh.shards.delete(id).await.unwrap();
  assert!(!path.exists());
  let mut wal = path.clone().into_os_string();
  wal.push("-wal");
  assert!(!std::path::Path::new(&wal).exists());
}

#[tokio::test]
async fn reopening_with_other_dimensions_is_rejected() {
  let tmp = tempfile::tempdir().unwrap();
  let backend = BackendConfig::File { dir: tmp.path().to_path_buf() };
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    Arc::clone(&directory),
    backend.clone(),
    TestEmbeddings::default(),
    IngestConfig::default(),
  )
  .await;
  let id = world(&h, "acme").await;

  let narrow = ShardManager::new(directory, Backend::from_config(&backend), DIMS / 2);
  let err = narrow.get(id).await.unwrap_err();
  assert!(matches!(
    err,
    Error::DimensionMismatch { expected: DIMS, actual } if actual == DIMS / 2
  ));
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reinserting_a_quad_is_idempotent() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let quad = text_quad("alice", "bio", "Alice likes rock climbing.");
  let patch = Patch::insert([quad.clone()]);

  h.ingest.apply(id, &[patch.clone()]).await.unwrap();
  let first = h.ingest.chunks_for_triple(id, &quad.triple_id()).await.unwrap();
  h.ingest.apply(id, &[patch]).await.unwrap();
  let second = h.ingest.chunks_for_triple(id, &quad.triple_id()).await.unwrap();

  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
  assert_eq!(first.len(), 1);
  assert_eq!(
    first.iter().map(|c| &c.id).collect::<Vec<_>>(),
    second.iter().map(|c| &c.id).collect::<Vec<_>>()
  );
}

#[tokio::test]
async fn short_literal_reuses_whole_text_embedding() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let quad = text_quad("alice", "bio", "Short bio");
  let before = h.embeddings.calls();

  h.ingest.apply(id, &[Patch::insert([quad.clone()])]).await.unwrap();

  assert_eq!(h.embeddings.calls() - before, 1);
  let chunks = h.ingest.chunks_for_triple(id, &quad.triple_id()).await.unwrap();
  assert_eq!(chunks.len(), 1);
  assert_eq!(chunks[0].id, chunk_id(&quad.triple_id(), 0));
  assert_eq!(chunks[0].text, "Short bio");
  assert_eq!(chunks[0].vector, bag_of_words("Short bio"));
  assert_eq!(chunks[0].subject, "http://ex.org/alice");
  assert_eq!(chunks[0].predicate, "http://ex.org/bio");
}

#[tokio::test]
async fn long_literal_is_chunked_and_each_chunk_embedded() {
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    directory,
    BackendConfig::Memory,
    TestEmbeddings::default(),
    IngestConfig { chunk_size: 40, chunk_overlap: 10 },
  )
  .await;
  let id = world(&h, "acme").await;
  let text = "Paragraph one talks about owls.\n\nParagraph two covers hawks and \
              falcons in some detail.\n\nParagraph three is about kestrels.";
  let quad = text_quad("birds", "notes", text);
  let before = h.embeddings.calls();

  h.ingest.apply(id, &[Patch::insert([quad.clone()])]).await.unwrap();

  let chunks = h.ingest.chunks_for_triple(id, &quad.triple_id()).await.unwrap();
  assert!(chunks.len() > 1);
  assert_eq!(h.embeddings.calls() - before, 1 + chunks.len());
  for (i, chunk) in chunks.iter().enumerate() {
    assert_eq!(chunk.id, chunk_id(&quad.triple_id(), i));
    assert!(chunk.text.chars().count() <= 40);
    assert_eq!(chunk.vector, bag_of_words(&chunk.text));
  }

  let triple = h.ingest.get_triple(id, &quad.triple_id()).await.unwrap().unwrap();
  assert_eq!(triple.object, text);
}

#[tokio::test]
async fn non_literal_and_empty_objects_have_no_chunks() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let to_iri = Quad::new(iri("alice"), iri("knows"), iri("bob"));
  let to_blank = Quad::new(iri("alice"), iri("owns"), Term::blank("b7"));
  let empty = text_quad("alice", "nickname", "");

  h.ingest
    .apply(id, &[Patch::insert([to_iri.clone(), to_blank.clone(), empty.clone()])])
    .await
    .unwrap();

  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 3);
  for q in [&to_iri, &to_blank, &empty] {
    assert!(h.ingest.chunks_for_triple(id, &q.triple_id()).await.unwrap().is_empty());
  }
  let t = h.ingest.get_triple(id, &to_iri.triple_id()).await.unwrap().unwrap();
  assert_eq!(t.object, "http://ex.org/bob");
  let t = h.ingest.get_triple(id, &to_blank.triple_id()).await.unwrap().unwrap();
  assert_eq!(t.object, format!("{SKOLEM_PREFIX}0"));
}

#[tokio::test]
async fn blank_subject_is_stored_skolemized() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let quad = Quad::new(Term::blank("n1"), iri("label"), Term::literal("anon"));
  h.ingest.apply(id, &[Patch::insert([quad.clone()])]).await.unwrap();

  let t = h.ingest.get_triple(id, &quad.triple_id()).await.unwrap().unwrap();
  assert_eq!(t.subject, format!("{SKOLEM_PREFIX}0"));

  // The same statement under a different label is the same triple.
  let relabeled = Quad::new(Term::blank("zz"), iri("label"), Term::literal("anon"));
  h.ingest.apply(id, &[Patch::insert([relabeled])]).await.unwrap();
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
}

#[tokio::test]
async fn deleting_a_triple_removes_only_its_chunks() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let keep = text_quad("a", "p", "keep this text");
  let gone = text_quad("b", "p", "drop this text");
  h.ingest
    .apply(id, &[Patch::insert([keep.clone(), gone.clone()])])
    .await
    .unwrap();

  h.ingest.apply(id, &[Patch::delete([gone.clone()])]).await.unwrap();

  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
  assert!(h.ingest.get_triple(id, &gone.triple_id()).await.unwrap().is_none());
  assert!(h.ingest.chunks_for_triple(id, &gone.triple_id()).await.unwrap().is_empty());
  assert_eq!(h.ingest.chunks_for_triple(id, &keep.triple_id()).await.unwrap().len(), 1);

  // The lexical index forgets the deleted chunk too.
  let hits = h
    .search
    .search(&SearchRequest {
      query: "drop".into(),
      world_ids: vec![id],
      limit: 10,
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(hits.iter().all(|hit| hit.fts_rank.is_none()));
}

#[tokio::test]
async fn embedding_failure_writes_nothing_for_the_patch() {
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    directory,
    BackendConfig::Memory,
    TestEmbeddings::failing_on("poison"),
    IngestConfig::default(),
  )
  .await;
  let id = world(&h, "acme").await;

  let patches = [
    Patch::insert([text_quad("a", "p", "first patch is fine")]),
    Patch::insert([text_quad("b", "p", "fine"), text_quad("c", "p", "poison pill")]),
    Patch::insert([text_quad("d", "p", "never reached")]),
  ];
  let err = h.ingest.apply(id, &patches).await.unwrap_err();
  assert!(matches!(err, Error::Embedding(_)));

  // Only the first patch landed; the failing one left no partial triple.
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
  let b = text_quad("b", "p", "fine");
  assert!(h.ingest.get_triple(id, &b.triple_id()).await.unwrap().is_none());
}

#[tokio::test]
async fn ingesting_into_world_without_shard_fails() {
  let h = harness().await;
  let w = h.directory.create_world(new_world("acme", "bare")).await.unwrap();
  let err = h
    .ingest
    .apply(w.id, &[Patch::insert([text_quad("s", "p", "x")])])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ShardNotFound(_)));
}

#[tokio::test]
async fn patch_buffer_commits_in_order() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  let quad = text_quad("s", "p", "buffered");

  let mut buffer = h.ingest.buffer(id);
  assert!(buffer.is_empty());
  buffer.push(Patch::insert([quad.clone()]));
  buffer.push(Patch::delete([quad.clone()]));
  assert_eq!(buffer.len(), 2);
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 0);

  buffer.commit().await.unwrap();
  assert!(buffer.is_empty());
  // Insert then delete, in that order, leaves nothing behind.
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 0);

  buffer.push(Patch::insert([quad]));
  buffer.commit().await.unwrap();
  assert_eq!(h.ingest.triple_count(id).await.unwrap(), 1);
}

#[tokio::test]
async fn empty_commit_is_a_no_op() {
  let h = harness().await;
  // No shard exists for this id, so any storage access would fail.
  let mut buffer = h.ingest.buffer(Uuid::new_v4());
  buffer.commit().await.unwrap();
  buffer.commit().await.unwrap();
}

#[tokio::test]
async fn failed_commit_keeps_pending_patches() {
  let directory = Arc::new(SqliteDirectory::open_in_memory().await.unwrap());
  let h = harness_with(
    directory,
    BackendConfig::Memory,
    TestEmbeddings::failing_on("poison"),
    IngestConfig::default(),
  )
  .await;
  let id = world(&h, "acme").await;

  let mut buffer = h.ingest.buffer(id);
  buffer.push(Patch::insert([text_quad("s", "p", "poison")]));
  assert!(buffer.commit().await.is_err());
  assert_eq!(buffer.len(), 1);
}

// ─── Search ──────────────────────────────────────────────────────────────────

async fn seed(h: &Harness, id: Uuid) {
  h.ingest
    .apply(
      id,
      &[Patch::insert([
        text_quad("fox", "description", "The quick brown fox jumps over the lazy dog"),
        text_quad("rust", "description", "Ownership and borrowing rules in Rust"),
        text_quad("bread", "description", "Tips for baking sourdough bread at home"),
        text_quad("rust", "tagline", "Fearless concurrency"),
      ])],
    )
    .await
    .unwrap();
}

fn request(query: &str, world_ids: Vec<Uuid>) -> SearchRequest {
  SearchRequest { query: query.into(), world_ids, limit: 10, ..Default::default() }
}

#[tokio::test]
async fn search_ranks_lexical_and_vector_match_first() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  seed(&h, id).await;

  let hits = h.search.search(&request("borrowing rules", vec![id])).await.unwrap();
  let top = &hits[0];
  assert_eq!(top.subject, "http://ex.org/rust");
  assert_eq!(top.object, "Ownership and borrowing rules in Rust");
  assert_eq!(top.fts_rank, Some(1));
  assert!(top.vec_rank.is_some());
  assert_eq!(top.world_id, id);
  assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn search_applies_subject_and_predicate_filters() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  seed(&h, id).await;

  let mut req = request("rust", vec![id]);
  req.predicates = vec!["http://ex.org/tagline".into()];
  let hits = h.search.search(&req).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].object, "Fearless concurrency");

  let mut req = request("bread", vec![id]);
  req.subjects = vec!["http://ex.org/fox".into()];
  let hits = h.search.search(&req).await.unwrap();
  assert!(hits.iter().all(|hit| hit.subject == "http://ex.org/fox"));
}

#[tokio::test]
async fn search_respects_limit_across_worlds() {
  let h = harness().await;
  let a = world(&h, "acme").await;
  let b = world(&h, "acme").await;
  seed(&h, a).await;
  seed(&h, b).await;

  let mut req = request("rust bread fox", vec![a, b]);
  req.limit = 3;
  let hits = h.search.search(&req).await.unwrap();
  assert_eq!(hits.len(), 3);
  assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn failing_world_does_not_fail_search() {
  let h = harness().await;
  let a = world(&h, "acme").await;
  seed(&h, a).await;
  let without_shard = h.directory.create_world(new_world("acme", "bare")).await.unwrap().id;

  let hits = h
    .search
    .search(&request("sourdough", vec![without_shard, a, Uuid::new_v4()]))
    .await
    .unwrap();
  assert!(!hits.is_empty());
  assert!(hits.iter().all(|hit| hit.world_id == a));
}

/// Delegates to a [`SqliteDirectory`] but never answers lookups of `stalled`.
struct StallingDirectory {
  inner:   SqliteDirectory,
  stalled: Uuid,
}

impl WorldDirectory for StallingDirectory {
  type Error = Error;

  async fn create_world(&self, input: NewWorld) -> Result<World, Error> {
    self.inner.create_world(input).await
  }

  async fn get_world(&self, id: Uuid) -> Result<Option<World>, Error> {
    if id == self.stalled {
      std::future::pending::<()>().await;
    }
    self.inner.get_world(id).await
  }

  async fn list_worlds(&self, organization_id: &str) -> Result<Vec<World>, Error> {
    self.inner.list_worlds(organization_id).await
  }

  async fn update_world(&self, id: Uuid, update: WorldUpdate) -> Result<Option<World>, Error> {
    self.inner.update_world(id, update).await
  }

  async fn set_shard_locator(&self, id: Uuid, locator: Option<ShardLocator>) -> Result<(), Error> {
    self.inner.set_shard_locator(id, locator).await
  }

  async fn soft_delete_world(&self, id: Uuid) -> Result<bool, Error> {
    self.inner.soft_delete_world(id).await
  }

  async fn purge_world(&self, id: Uuid) -> Result<bool, Error> { self.inner.purge_world(id).await }
}

#[tokio::test]
async fn stalled_world_times_out_without_stalling_search() {
  let inner = SqliteDirectory::open_in_memory().await.unwrap();
  let stalled = inner.create_world(new_world("acme", "slow")).await.unwrap().id;
  let directory = Arc::new(StallingDirectory { inner, stalled });

  let shards = Arc::new(ShardManager::new(
    Arc::clone(&directory),
    Backend::from_config(&BackendConfig::Memory),
    DIMS,
  ));
  let embeddings = Arc::new(TestEmbeddings::default());
  let ingest =
    IngestionPipeline::new(Arc::clone(&shards), Arc::clone(&embeddings), &IngestConfig::default())
      .unwrap();
  let search = HybridSearchEngine::new(
    Arc::clone(&shards),
    embeddings,
    SearchConfig { shard_timeout_ms: 50, ..SearchConfig::default() },
  );

  let live = directory.create_world(new_world("acme", "fast")).await.unwrap().id;
  shards.create(live).await.unwrap();
  ingest
    .apply(live, &[Patch::insert([text_quad("bread", "d", "Baking sourdough bread")])])
    .await
    .unwrap();

  let started = Instant::now();
  let hits = search.search(&request("sourdough", vec![stalled, live])).await.unwrap();
  assert!(started.elapsed() < Duration::from_secs(2));
  assert!(!hits.is_empty());
  assert!(hits.iter().all(|hit| hit.world_id == live));
}

#[tokio::test]
async fn empty_world_list_returns_nothing_without_embedding() {
  let h = harness().await;
  let before = h.embeddings.calls();
  let hits = h.search.search(&request("anything", vec![])).await.unwrap();
  assert!(hits.is_empty());
  assert_eq!(h.embeddings.calls(), before);
}

#[tokio::test]
async fn punctuation_only_query_still_runs_vector_search() {
  let h = harness().await;
  let id = world(&h, "acme").await;
  seed(&h, id).await;
  let hits = h.search.search(&request("?!", vec![id])).await.unwrap();
  assert!(hits.iter().all(|hit| hit.fts_rank.is_none()));
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

#[tokio::test]
async fn five_per_minute_bucket() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let limiter = dir.rate_limiter();
  let t0 = 1_700_000_000_000;

  for expected in [4, 3, 2, 1, 0] {
    let d = limiter.check_limit_at("alice:search", 5, 60_000, t0).await.unwrap();
    assert!(d.allowed);
    assert_eq!(d.remaining, expected);
    assert_eq!(d.limit, 5);
    assert_eq!(d.reset_at_ms, t0 + 60_000);
  }

  let denied = limiter.check_limit_at("alice:search", 5, 60_000, t0).await.unwrap();
  assert!(!denied.allowed);
  assert_eq!(denied.remaining, 0);
  assert_eq!(denied.reset_at_ms, t0 + 60_000);

  let later = limiter
    .check_limit_at("alice:search", 5, 60_000, t0 + 60_000)
    .await
    .unwrap();
  assert!(later.allowed);
  assert_eq!(later.remaining, 4);
}

#[tokio::test]
async fn buckets_are_independent_and_shared_between_handles() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let first = dir.rate_limiter();
  let second = dir.rate_limiter();
  let t0 = 1_000;

  assert!(first.check_limit_at("a:x", 1, 60_000, t0).await.unwrap().allowed);
  assert!(!second.check_limit_at("a:x", 1, 60_000, t0).await.unwrap().allowed);
  assert!(second.check_limit_at("b:x", 1, 60_000, t0).await.unwrap().allowed);
}

#[tokio::test]
async fn check_keys_by_identity_and_feature() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let limiter = dir.rate_limiter();

  assert!(limiter.check("alice", "search", 1, 60_000).await.unwrap().allowed);
  assert!(!limiter.check("alice", "search", 1, 60_000).await.unwrap().allowed);
  assert!(limiter.check("alice", "patches", 1, 60_000).await.unwrap().allowed);
  assert!(!limiter.check_limit("alice:patches", 1, 60_000).await.unwrap().allowed);
}

#[tokio::test]
async fn privileged_identities_bypass_limits() {
  let dir = SqliteDirectory::open_in_memory().await.unwrap();
  let limiter = dir.rate_limiter().with_privileged(["admin".to_owned()]);

  for _ in 0..10 {
    let d = limiter.check("admin", "search", 1, 60_000).await.unwrap();
    assert!(d.allowed);
    assert_eq!(d.remaining, 1);
  }
  assert!(limiter.check("bob", "search", 1, 60_000).await.unwrap().allowed);
  assert!(!limiter.check("bob", "search", 1, 60_000).await.unwrap().allowed);
}
