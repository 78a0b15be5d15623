//! Handlers for `/harmonic-targets` endpoints.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use reop_core::{harmonic::HarmonicTarget, store::RecordStore};

use crate::{AppState, error::ApiError, operator::Operator};

/// `POST /harmonic-targets`
pub async fn create<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Json(target): Json<HarmonicTarget>,
) -> Result<impl IntoResponse, ApiError> {
  let saved = state
    .store
    .save_harmonic_target(&ctx, target)
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /harmonic-targets/active`, highest resonance first.
pub async fn active<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(_): Operator,
) -> Result<Json<Vec<HarmonicTarget>>, ApiError> {
  let targets = state
    .store
    .find_active_manifestations()
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(targets))
}
