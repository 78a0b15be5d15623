//! JSON REST API for the REOP record store.
//!
//! Exposes an axum [`Router`] backed by any [`reop_core::store::RecordStore`].
//! Every route requires an `x-operator-id` header naming the caller; TLS and
//! authentication of that header are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", reop_api::api_router(store.clone(), weights))
//! ```

pub mod commands;
pub mod error;
pub mod harmonic;
pub mod operator;
pub mod targets;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use reop_core::{store::RecordStore, thresholds::ScoreWeights};

pub use error::ApiError;
pub use operator::{OPERATOR_HEADER, Operator};

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub weights: ScoreWeights,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), weights: self.weights }
  }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, weights: ScoreWeights) -> Router<()>
where
  S: RecordStore + 'static,
{
  Router::new()
    // Target profiles
    .route(
      "/target-profiles",
      get(targets::list::<S>).post(targets::create::<S>),
    )
    .route(
      "/target-profiles/{id}",
      get(targets::get_one::<S>).put(targets::replace::<S>),
    )
    .route("/target-profiles/{id}/analyze", post(targets::analyze::<S>))
    .route("/target-profiles/{id}/sessions", post(targets::add_session::<S>))
    .route(
      "/target-profiles/{id}/coherence-samples",
      get(targets::coherence_samples::<S>),
    )
    // Harmonic targets
    .route("/harmonic-targets", post(harmonic::create::<S>))
    .route("/harmonic-targets/active", get(harmonic::active::<S>))
    // Commands
    .route("/commands", get(commands::list::<S>).post(commands::create::<S>))
    .route("/commands/{id}", get(commands::get_one::<S>))
    .route("/commands/{id}/status", post(commands::transition::<S>))
    .route(
      "/commands/{id}/executions",
      get(commands::executions::<S>).post(commands::record_execution::<S>),
    )
    .route(
      "/commands/{id}/documentation",
      get(commands::documentation::<S>).post(commands::attach_documentation::<S>),
    )
    .with_state(AppState { store, weights })
}
