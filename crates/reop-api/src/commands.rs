//! Handlers for `/commands` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/commands` | The caller's commands, newest first |
//! | `POST` | `/commands` | Body: [`NewCommand`]; returns 201 in `pending` |
//! | `GET`  | `/commands/:id` | 404 if missing or owned by another operator |
//! | `POST` | `/commands/:id/status` | Body: `{"status":"processing"}`; 409 on a forbidden transition |
//! | `GET`  | `/commands/:id/executions` | Oldest first |
//! | `POST` | `/commands/:id/executions` | Body: [`ExecutionBody`] |
//! | `GET`  | `/commands/:id/documentation` | |
//! | `POST` | `/commands/:id/documentation` | Body: `{"title":"...","body":"..."}` |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use reop_core::{
  access::OperatorContext,
  command::{
    Command, CommandStatus, Documentation, ExecutionLog, ExecutionStatus,
    NewCommand, NewDocumentation, NewExecution,
  },
  store::RecordStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError, operator::Operator};

async fn load<S: RecordStore>(
  store: &S,
  ctx: &OperatorContext,
  id: &str,
) -> Result<Command, ApiError> {
  store
    .get_command(ctx, id)
    .await
    .map_err(ApiError::from_store)?
    .ok_or_else(|| ApiError::NotFound(format!("command {id} not found")))
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// `GET /commands`
pub async fn list<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
) -> Result<Json<Vec<Command>>, ApiError> {
  let commands = state
    .store
    .find_by_operator(&ctx, &ctx.operator_id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(commands))
}

/// `POST /commands`
pub async fn create<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Json(input): Json<NewCommand>,
) -> Result<impl IntoResponse, ApiError> {
  let command = state
    .store
    .create_command(&ctx, input)
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(command)))
}

/// `GET /commands/:id`
pub async fn get_one<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<Command>, ApiError> {
  Ok(Json(load(state.store.as_ref(), &ctx, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
  pub status: CommandStatus,
}

/// `POST /commands/:id/status`
pub async fn transition<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
  Json(body): Json<TransitionBody>,
) -> Result<Json<Command>, ApiError> {
  let command = state
    .store
    .transition_command(&ctx, &id, body.status)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(command))
}

// ─── Executions ──────────────────────────────────────────────────────────────

/// An execution attempt; the command comes from the path.
#[derive(Debug, Deserialize)]
pub struct ExecutionBody {
  pub status:                 ExecutionStatus,
  #[serde(default = "Utc::now")]
  pub started_at:             DateTime<Utc>,
  #[serde(default)]
  pub ended_at:               Option<DateTime<Utc>>,
  #[serde(default)]
  pub coherence_maintained:   bool,
  #[serde(default)]
  pub biochemically_verified: bool,
  #[serde(default)]
  pub documentation_complete: bool,
  #[serde(default)]
  pub coherence_delta:        Option<f64>,
  #[serde(default)]
  pub notes:                  Option<String>,
}

impl ExecutionBody {
  fn into_new(self, command_id: String) -> NewExecution {
    NewExecution {
      command_id,
      status: self.status,
      started_at: self.started_at,
      ended_at: self.ended_at,
      coherence_maintained: self.coherence_maintained,
      biochemically_verified: self.biochemically_verified,
      documentation_complete: self.documentation_complete,
      coherence_delta: self.coherence_delta,
      notes: self.notes,
    }
  }
}

/// `GET /commands/:id/executions`
pub async fn executions<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionLog>>, ApiError> {
  load(state.store.as_ref(), &ctx, &id).await?;
  let logs = state
    .store
    .executions_for(&ctx, &id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(logs))
}

/// `POST /commands/:id/executions`
pub async fn record_execution<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
  Json(body): Json<ExecutionBody>,
) -> Result<impl IntoResponse, ApiError> {
  let log = state
    .store
    .record_execution(&ctx, body.into_new(id))
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(log)))
}

// ─── Documentation ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DocumentationBody {
  pub title: String,
  #[serde(default)]
  pub body:  String,
}

/// `GET /commands/:id/documentation`
pub async fn documentation<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
) -> Result<Json<Vec<Documentation>>, ApiError> {
  load(state.store.as_ref(), &ctx, &id).await?;
  let docs = state
    .store
    .documentation_for(&ctx, &id)
    .await
    .map_err(ApiError::from_store)?;
  Ok(Json(docs))
}

/// `POST /commands/:id/documentation`
pub async fn attach_documentation<S: RecordStore>(
  State(state): State<AppState<S>>,
  Operator(ctx): Operator,
  Path(id): Path<String>,
  Json(body): Json<DocumentationBody>,
) -> Result<impl IntoResponse, ApiError> {
  let doc = state
    .store
    .attach_documentation(
      &ctx,
      NewDocumentation { command_id: id, title: body.title, body: body.body },
    )
    .await
    .map_err(ApiError::from_store)?;
  Ok((StatusCode::CREATED, Json(doc)))
}
