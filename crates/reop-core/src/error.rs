//! Error types for `reop-core`.

use thiserror::Error;

use crate::{command::CommandStatus, validate::ValidationErrors};

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(#[from] ValidationErrors),

  #[error("target profile not found: {0}")]
  ProfileNotFound(String),

  #[error("harmonic target not found: {0}")]
  HarmonicTargetNotFound(String),

  #[error("command not found: {0}")]
  CommandNotFound(String),

  #[error("command {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id:   String,
    from: CommandStatus,
    to:   CommandStatus,
  },

  #[error("profiling history of {0} is append-only")]
  HistoryRewrite(String),

  #[error("identifier already exists: {0}")]
  DuplicateId(String),

  #[error("unknown {kind} value: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Classification ──────────────────────────────────────────────────────────

/// Coarse error category, used by outer layers (HTTP, CLI) to pick a
/// response without depending on a concrete backend's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  Invalid,
  NotFound,
  Conflict,
  Internal,
}

/// Implemented by every store error type.
pub trait Classify {
  fn class(&self) -> ErrorClass;

  /// The violated constraints, when the error is a validation failure.
  fn violations(&self) -> Option<&ValidationErrors> { None }
}

impl Classify for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Error::Validation(_) => ErrorClass::Invalid,
      Error::ProfileNotFound(_)
      | Error::HarmonicTargetNotFound(_)
      | Error::CommandNotFound(_) => ErrorClass::NotFound,
      Error::InvalidTransition { .. }
      | Error::HistoryRewrite(_)
      | Error::DuplicateId(_) => ErrorClass::Conflict,
      Error::UnknownVariant { .. } | Error::Serialization(_) => {
        ErrorClass::Internal
      }
    }
  }

  fn violations(&self) -> Option<&ValidationErrors> {
    match self {
      Error::Validation(v) => Some(v),
      _ => None,
    }
  }
}
