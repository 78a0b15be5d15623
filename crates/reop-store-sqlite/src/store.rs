//! [`SqliteStore`]: connection ownership, startup, and schema administration.
//!
//! The trait implementations live in [`crate::documents`] and
//! [`crate::records`].

use std::path::Path;

use reop_core::thresholds::Thresholds;

use crate::{
  Result,
  migrations::{self, AppliedMigration, SchemaSnapshot},
  schema::DOCUMENT_SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A REOP record store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn:       tokio_rusqlite::Connection,
  pub(crate) thresholds: Thresholds,
}

impl SqliteStore {
  /// Open (or create) a store at `path`, create the document table and apply
  /// every pending migration.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, Thresholds::default(), true).await
  }

  /// Open an in-memory store with the full schema. Useful for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, Thresholds::default(), true).await
  }

  /// Open a store without applying migrations. Used by the `migrate`
  /// commands, which manage the relational schema explicitly.
  pub async fn open_unmigrated(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, Thresholds::default(), false).await
  }

  /// In-memory counterpart of [`Self::open_unmigrated`].
  pub async fn open_in_memory_unmigrated() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, Thresholds::default(), false).await
  }

  /// Replace the thresholds write methods validate against.
  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
    self.thresholds = thresholds;
    self
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    thresholds: Thresholds,
    migrate: bool,
  ) -> Result<Self> {
    let store = Self { conn, thresholds };
    store
      .conn
      .call(|conn| {
        conn.execute_batch(DOCUMENT_SCHEMA)?;
        Ok(())
      })
      .await?;
    if migrate {
      store.migrate_up().await?;
    }
    Ok(store)
  }

  /// Run `f` on the connection thread. Errors raised inside `f` keep their
  /// own type instead of being wrapped by `tokio_rusqlite`.
  pub(crate) async fn run<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }

  // ── Schema administration ───────────────────────────────────────────────

  /// Apply pending migrations. Returns the versions applied, in order.
  pub async fn migrate_up(&self) -> Result<Vec<u32>> {
    self.run(migrations::migrate_up).await
  }

  /// Revert applied migrations above `target`. Returns the versions reverted,
  /// newest first.
  pub async fn migrate_down(&self, target: u32) -> Result<Vec<u32>> {
    self.run(move |conn| migrations::migrate_down(conn, target)).await
  }

  pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
    self.run(|conn| migrations::applied(conn)).await
  }

  pub async fn schema_version(&self) -> Result<u32> {
    self.run(|conn| migrations::current_version(conn)).await
  }

  pub async fn schema_snapshot(&self) -> Result<SchemaSnapshot> {
    self.run(|conn| migrations::snapshot(conn)).await
  }
}
