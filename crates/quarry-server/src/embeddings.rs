//! [`HttpEmbeddings`]: an OpenAI-compatible `/embeddings` client.
//!
//! Works with any provider exposing the OpenAI embeddings API (OpenAI itself,
//! Ollama, vLLM, LiteLLM, ...). Every returned vector is checked against the
//! configured dimensionality before it reaches a shard.

use std::time::Duration;

use quarry_core::embed::Embeddings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
  /// API root, e.g. `https://api.openai.com/v1`.
  pub base_url:   String,
  pub model:      String,
  #[serde(default)]
  pub api_key:    Option<String>,
  pub dimensions: usize,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 { 30_000 }

#[derive(Debug, Error)]
pub enum EmbeddingError {
  #[error("embedding request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("embedding response contained no vectors")]
  Empty,

  #[error("provider returned {actual} dimensions, expected {expected}")]
  Dimensions { expected: usize, actual: usize },
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
}

pub struct HttpEmbeddings {
  client:     reqwest::Client,
  url:        String,
  model:      String,
  api_key:    Option<String>,
  dimensions: usize,
}

impl HttpEmbeddings {
  pub fn new(config: &EmbeddingsConfig) -> Result<Self, EmbeddingError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()?;
    Ok(Self {
      client,
      url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
      model: config.model.clone(),
      api_key: config.api_key.clone(),
      dimensions: config.dimensions,
    })
  }

  fn first_vector(&self, response: EmbeddingResponse) -> Result<Vec<f32>, EmbeddingError> {
    let vector = response
      .data
      .into_iter()
      .next()
      .ok_or(EmbeddingError::Empty)?
      .embedding;
    if vector.len() != self.dimensions {
      return Err(EmbeddingError::Dimensions {
        expected: self.dimensions,
        actual:   vector.len(),
      });
    }
    Ok(vector)
  }
}

impl Embeddings for HttpEmbeddings {
  type Error = EmbeddingError;

  fn dimensions(&self) -> usize { self.dimensions }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    debug!(model = %self.model, chars = text.len(), "sending embedding request");
    let mut request = self
      .client
      .post(&self.url)
      .json(&EmbeddingRequest { model: &self.model, input: text });
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }
    let response: EmbeddingResponse = request.send().await?.error_for_status()?.json().await?;
    self.first_vector(response)
  }
}
