//! quarry server binary.
//!
//! Reads `quarry.toml` (or the path given with `--config`), opens the
//! metadata database, and serves the JSON API over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use quarry_api::AppState;
use quarry_core::embed::Embeddings as _;
use quarry_server::{HttpEmbeddings, ServerConfig};
use quarry_store_sqlite::{
  Backend, HybridSearchEngine, IngestionPipeline, ShardManager, SqliteDirectory,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Quarry knowledge-graph server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "quarry.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  if let Some(parent) = cfg.metadata_path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let directory = SqliteDirectory::open(&cfg.metadata_path)
    .await
    .with_context(|| format!("failed to open metadata database at {:?}", cfg.metadata_path))?;
  let limiter = directory
    .rate_limiter()
    .with_privileged(cfg.rate_limit.privileged_identities.iter().cloned());
  let directory = Arc::new(directory);

  let embeddings =
    Arc::new(HttpEmbeddings::new(&cfg.embeddings).context("failed to build embeddings client")?);
  let shards = Arc::new(ShardManager::new(
    Arc::clone(&directory),
    Backend::from_config(&cfg.backend),
    embeddings.dimensions(),
  ));
  let ingest = IngestionPipeline::new(Arc::clone(&shards), Arc::clone(&embeddings), &cfg.ingest)
    .context("invalid ingest configuration")?;
  let search = HybridSearchEngine::new(Arc::clone(&shards), embeddings, cfg.search);

  let state = AppState {
    directory,
    shards,
    ingest: Arc::new(ingest),
    search: Arc::new(search),
    limiter,
    limits: cfg.rate_limit.limits(),
  };

  let app = quarry_api::api_router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!(backend = cfg.backend_kind(), "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::warn!(error = %e, "failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutting down");
}
