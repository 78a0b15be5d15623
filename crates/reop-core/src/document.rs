//! Raw document-collection access.
//!
//! Used by batch jobs that must handle documents whose shape predates the
//! typed model. Field paths are dotted (`neo_findings.verification_ci`) and
//! restricted to ASCII letters, digits, `_` and `.`.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document and its id within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id:   String,
  pub body: Value,
}

/// Predicates understood by [`DocumentStore::count_matching`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFilter {
  /// At least one of the fields is absent or null.
  MissingAny(Vec<String>),
  /// A numeric field is present and below `threshold`.
  Below { path: String, threshold: f64 },
  /// A numeric field is present and above `threshold`.
  Above { path: String, threshold: f64 },
}

/// A secondary index on one nested field of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
  pub name: &'static str,
  pub path: &'static str,
}

/// Whether a collection name, index name, or field path is safe to embed in
/// generated statements.
pub fn is_valid_path(path: &str) -> bool {
  !path.is_empty()
    && !path.starts_with('.')
    && !path.ends_with('.')
    && !path.contains("..")
    && path
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Copy every document of `from` into `to`. Returns the number copied.
  fn copy_collection<'a>(
    &'a self,
    from: &'a str,
    to: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  fn load_all<'a>(
    &'a self,
    collection: &'a str,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

  fn insert_document<'a>(
    &'a self,
    collection: &'a str,
    doc: Document,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Set top-level fields of one document, leaving the others in place.
  fn set_fields<'a>(
    &'a self,
    collection: &'a str,
    id: &'a str,
    fields: Map<String, Value>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove `fields` from every document of the collection. Returns the
  /// number of documents that carried at least one of them.
  fn unset_fields<'a>(
    &'a self,
    collection: &'a str,
    fields: &'a [&'a str],
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  fn count_matching<'a>(
    &'a self,
    collection: &'a str,
    filter: &'a DocumentFilter,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Create the index if it does not exist.
  fn create_index<'a>(
    &'a self,
    collection: &'a str,
    spec: &'a IndexSpec,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Drop an index. Fails if it does not exist.
  fn drop_index<'a>(
    &'a self,
    collection: &'a str,
    name: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
