//! Configuration and router assembly for the `reop` binary.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::Router;
use reop_core::thresholds::{ScoreWeights, Thresholds};
use reop_store_sqlite::SqliteStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `config.toml` layered with
/// `REOP_*` environment variables. Every field has a default.
///
/// Nested keys use a double underscore in the environment, e.g.
/// `REOP_THRESHOLDS__MIN_COHERENCE=0.75`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub thresholds: Thresholds,
  pub weights:    ScoreWeights,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".into(),
      port:       8080,
      store_path: PathBuf::from("~/.local/share/reop/reop.db"),
      thresholds: Thresholds::default(),
      weights:    ScoreWeights::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Read `path` (optional; a missing file yields the defaults) and overlay
/// the environment.
pub fn load_config(path: &Path) -> Result<ServerConfig, config::ConfigError> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("REOP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()?
    .try_deserialize()
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full application: the REST API under `/api`, with request tracing.
pub fn app(store: Arc<SqliteStore>, weights: ScoreWeights) -> Router {
  Router::new()
    .nest("/api", reop_api::api_router(store, weights))
    .layer(TraceLayer::new_for_http())
}
