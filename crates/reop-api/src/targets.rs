//! Handlers for `/target-profiles` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/target-profiles` | Optional `?min_coherence`, `?min_success_rate` |
//! | `POST` | `/target-profiles` | Body: [`TargetProfile`]; returns 201 |
//! | `GET`  | `/target-profiles/:id` | 404 if not found or owned by another operator |
//! | `PUT`  | `/target-profiles/:id` | Replaces an existing profile; history is append-only |
//! | `POST` | `/target-profiles/:id/analyze` | Overall score and readiness |
//! | `POST` | `/target-profiles/:id/sessions` | Body: [`ProfilingSession`] |
//! | `GET`  | `/target-profiles/:id/coherence-samples` | Oldest first |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use reop_core::{
  access::OperatorContext,
  store::RecordStore,
  target::{ProfilingSession, TargetProfile},
  telemetry::CoherenceSample,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError, operator::Operator};

async fn load<S: RecordStore>(
  store: &S,
  ctx: &OperatorContext,
  id: &str,
) -> Result<TargetProfile, ApiError> {
  store
    .get_target_profile(ctx, id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("target profile {id} not found")))
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub min_coherence:    Option<f64>,
  /// When set, filters and sorts on `operational_experience.success_rate`.
  pub min_success_rate: Option<f64>,
}

/// `GET /target-profiles[?min_coherence=<f>][&min_success_rate=<f>]`
pub async fn list<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<TargetProfile>>, ApiError> {
  let profiles = match params.min_success_rate {
    Some(min) => {
      let floor = params.min_coherence.unwrap_or(0.0);
      state
        .store
        .find_by_success_rate_threshold(&ctx, min)
        .await
        .map_err(ApiError::from_store)?
        .into_iter()
        .filter(|p| p.coherence_index >= floor)
        .collect()
    }
    None => state
      .store
      .find_by_coherence_threshold(&ctx, params.min_coherence.unwrap_or(0.0))
      .await
      .map_err(ApiError::from_store)?,
  };
  Ok(Json(profiles))
}

// ─── Create / replace ────────────────────────────────────────────────────────

/// `POST /target-profiles`
pub async fn create<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Json(profile): Json<TargetProfile>,
) -> Result<impl IntoResponse, ApiError> {
  let saved = state
    .store
    .save_target_profile(&ctx, profile)
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(saved)))
}

/// `PUT /target-profiles/:id`
pub async fn replace<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
  Json(mut profile): Json<TargetProfile>,
) -> Result<Json<TargetProfile>, ApiError> {
  load(state.store.as_ref(), &ctx, &id).await?;
  profile.profile_id = id;
  let saved = state
    .store
    .save_target_profile(&ctx, profile)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(saved))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /target-profiles/:id`
pub async fn get_one<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<TargetProfile>, ApiError> {
  Ok(Json(load(state.store.as_ref(), &ctx, &id).await?))
}

// ─── Analyze ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Analysis {
  pub profile_id:            String,
  pub overall_score:         f64,
  pub ready_for_integration: bool,
}

/// `POST /target-profiles/:id/analyze`
pub async fn analyze<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<Analysis>, ApiError> {
  let profile = load(state.store.as_ref(), &ctx, &id).await?;
  Ok(Json(Analysis {
    overall_score:         profile.overall_score(&state.weights),
    ready_for_integration: profile
      .is_ready_for_integration(state.store.thresholds()),
    profile_id:            profile.profile_id,
  }))
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// `POST /target-profiles/:id/sessions`
pub async fn add_session<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
  Json(session): Json<ProfilingSession>,
) -> Result<impl IntoResponse, ApiError> {
  let profile = state
    .store
    .append_profiling_session(&ctx, &id, session)
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(profile)))
}

/// `GET /target-profiles/:id/coherence-samples`
pub async fn coherence_samples<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<Vec<CoherenceSample>>, ApiError> {
  load(state.store.as_ref(), &ctx, &id).await?;
  let samples = state
    .store
    .coherence_samples(&id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(samples))
}
