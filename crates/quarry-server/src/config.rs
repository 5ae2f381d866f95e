//! Runtime server configuration.
//!
//! Read from a TOML file, then overridden by `QUARRY_*` environment variables
//! with `__` between nested keys, e.g. `QUARRY_SEARCH__MAX_LIMIT=50`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use quarry_api::RateLimits;
use quarry_store_sqlite::{BackendConfig, IngestConfig, SearchConfig};
use serde::Deserialize;

use crate::embeddings::EmbeddingsConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:          String,
  #[serde(default = "default_port")]
  pub port:          u16,
  /// SQLite file holding world metadata and rate-limit buckets.
  #[serde(default = "default_metadata_path")]
  pub metadata_path: PathBuf,
  #[serde(default)]
  pub backend:       BackendConfig,
  pub embeddings:    EmbeddingsConfig,
  #[serde(default)]
  pub ingest:        IngestConfig,
  #[serde(default)]
  pub search:        SearchConfig,
  #[serde(default)]
  pub rate_limit:    RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub limit:                 u32,
  pub period_ms:             i64,
  /// Identities exempt from rate limiting.
  pub privileged_identities: Vec<String>,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    let limits = RateLimits::default();
    Self {
      limit:                 limits.limit,
      period_ms:             limits.period_ms,
      privileged_identities: vec![],
    }
  }
}

impl RateLimitConfig {
  pub fn limits(&self) -> RateLimits { RateLimits { limit: self.limit, period_ms: self.period_ms } }
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8080 }

fn default_metadata_path() -> PathBuf { PathBuf::from("quarry.db") }

impl ServerConfig {
  /// Load from `path` (optional) layered under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(
      config::Config::builder().add_source(config::File::from(path).required(false)),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    let settings = builder
      .add_source(
        config::Environment::with_prefix("QUARRY")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("rate_limit.privileged_identities"),
      )
      .build()
      .context("failed to read configuration")?;
    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.metadata_path = expand_tilde(&cfg.metadata_path);
    if let BackendConfig::File { dir } = &mut cfg.backend {
      *dir = expand_tilde(dir);
    }
    Ok(cfg)
  }

  /// Backend name for logging; the full config carries credentials.
  pub fn backend_kind(&self) -> &'static str {
    match self.backend {
      BackendConfig::Memory => "memory",
      BackendConfig::File { .. } => "file",
      BackendConfig::Remote(_) => "remote",
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
