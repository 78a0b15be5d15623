//! Core types and trait definitions for the REOP record store.
//!
//! This crate is free of HTTP and database dependencies. It holds the domain
//! model (target profiles, harmonic targets, commands, execution logs), the
//! validation and scoring rules, the store abstractions, and the document
//! backfill job, which is written against [`document::DocumentStore`].

// Native `async fn` in traits; the store traits spell out `Send` futures
// explicitly where it matters.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod backfill;
pub mod command;
pub mod document;
pub mod error;
pub mod harmonic;
pub mod id;
pub mod store;
pub mod target;
pub mod telemetry;
pub mod thresholds;
pub mod validate;

pub use error::{Classify, Error, ErrorClass, Result};
