//! SQLite backend for the REOP record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Document collections live in one JSON
//! table; relational tables evolve through [`migrations`].

mod documents;
mod encode;
mod policy;
mod records;
mod schema;
mod store;

pub mod error;
pub mod migrations;

pub use error::{Error, Result};
pub use records::{HARMONIC_COLLECTION, TARGET_COLLECTION};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
