//! The `Embeddings` collaborator trait.

use std::future::Future;

/// A text embedding provider with a fixed output dimensionality.
///
/// The dimensionality must not change for the lifetime of any shard whose
/// chunks were embedded with it; switching providers requires re-embedding.
pub trait Embeddings: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Length of every vector returned by [`Embeddings::embed`].
  fn dimensions(&self) -> usize;

  fn embed<'a>(
    &'a self,
    text: &'a str,
  ) -> impl Future<Output = Result<Vec<f32>, Self::Error>> + Send + 'a;
}
