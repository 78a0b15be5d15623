//! Connection setup and the document-collection table.
//!
//! Executed at connection startup. The relational tables are not declared
//! here; they evolve through the numbered migrations in
//! [`crate::migrations`].

/// Idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const DOCUMENT_SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Every document collection lives in this one table. Secondary indexes on
-- nested fields are partial expression indexes over `body`.
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    doc_id     TEXT NOT NULL,
    body       TEXT NOT NULL CHECK (json_valid(body)),
    PRIMARY KEY (collection, doc_id)
);
";

/// Name of the physical index backing a collection's logical index.
pub fn physical_index_name(collection: &str, name: &str) -> String {
  format!("doc_{collection}__{name}")
}

/// `a.b.c` → `$.a.b.c`.
pub fn json_path(path: &str) -> String { format!("$.{path}") }
