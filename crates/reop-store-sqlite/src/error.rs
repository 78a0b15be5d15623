//! Error type for `reop-store-sqlite`.

use reop_core::{Classify, ErrorClass, validate::ValidationErrors};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] reop_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("document not found: {collection}/{id}")]
  DocumentNotFound { collection: String, id: String },

  #[error("invalid identifier or field path: {0:?}")]
  InvalidPath(String),

  #[error(
    "database schema version {found} is newer than the latest known migration {known}"
  )]
  SchemaTooNew { found: u32, known: u32 },

  #[error("no migration with version {0}")]
  UnknownMigration(u32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<ValidationErrors> for Error {
  fn from(e: ValidationErrors) -> Self { Error::Core(e.into()) }
}

impl Classify for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Error::Core(e) => e.class(),
      Error::DocumentNotFound { .. } => ErrorClass::NotFound,
      Error::InvalidPath(_) => ErrorClass::Invalid,
      _ => ErrorClass::Internal,
    }
  }

  fn violations(&self) -> Option<&ValidationErrors> {
    match self {
      Error::Core(e) => e.violations(),
      _ => None,
    }
  }
}
