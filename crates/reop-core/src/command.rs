//! Commands, their execution logs, and attached documentation.
//!
//! Commands are never deleted. They are retired by moving to a terminal
//! status (`completed`, `failed`, `cancelled`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  thresholds::Thresholds,
  validate::{ValidationErrors, Validator},
};

// ─── Enumerations ────────────────────────────────────────────────────────────

/// The six command kinds. The set is closed; the relational schema carries
/// the same list as a CHECK constraint.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandType {
  HarmonicAlignment,
  CoherenceRestoration,
  FrequencyCalibration,
  BiochemicalRebalance,
  FieldStabilization,
  PureCollapse,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandStatus {
  #[default]
  Pending,
  Processing,
  Executing,
  Completed,
  Failed,
  Cancelled,
}

impl CommandStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  /// Allowed forward moves. Terminal states accept none.
  pub fn can_transition_to(self, next: Self) -> bool {
    use CommandStatus::*;
    matches!(
      (self, next),
      (Pending, Processing | Cancelled)
        | (Processing, Executing | Failed | Cancelled)
        | (Executing, Completed | Failed | Cancelled)
    )
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
  strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
  Started,
  Running,
  Succeeded,
  Failed,
  Aborted,
}

// ─── Command ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
  pub command_id:         String,
  pub command_type:       CommandType,
  pub status:             CommandStatus,
  pub coherence_index:    f64,
  /// 1 (lowest) to 10 (highest).
  pub execution_priority: u8,
  pub target_profile_id:  Option<String>,
  pub operator_id:        String,
  pub parameters:         BTreeMap<String, f64>,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
}

/// Input to [`crate::store::RecordStore::create_command`]. The operator is
/// taken from the caller's context; status always starts at `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommand {
  #[serde(default)]
  pub command_id:         Option<String>,
  pub command_type:       CommandType,
  pub coherence_index:    f64,
  #[serde(default = "default_priority")]
  pub execution_priority: u8,
  #[serde(default)]
  pub target_profile_id:  Option<String>,
  #[serde(default)]
  pub parameters:         BTreeMap<String, f64>,
}

fn default_priority() -> u8 { 5 }

impl NewCommand {
  pub fn new(command_type: CommandType, coherence_index: f64) -> Self {
    Self {
      command_id: None,
      command_type,
      coherence_index,
      execution_priority: default_priority(),
      target_profile_id: None,
      parameters: BTreeMap::new(),
    }
  }
}

impl Command {
  pub fn validate(&self, t: &Thresholds) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("command_id", &self.command_id);
    v.required("operator_id", &self.operator_id);
    v.gate("coherence_index", self.coherence_index, t.min_coherence);
    v.range(
      "execution_priority",
      f64::from(self.execution_priority),
      1.0,
      10.0,
    );
    for (key, value) in &self.parameters {
      if !value.is_finite() {
        v.invalid(&format!("parameters.{key}"), "must be a finite number");
      }
    }
    v.finish()
  }
}

// ─── Execution log ───────────────────────────────────────────────────────────

/// One attempted execution of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
  pub execution_id:           String,
  pub command_id:             String,
  pub operator_id:            String,
  pub status:                 ExecutionStatus,
  pub started_at:             DateTime<Utc>,
  pub ended_at:               Option<DateTime<Utc>>,
  pub duration_ms:            Option<i64>,
  pub coherence_maintained:   bool,
  pub biochemically_verified: bool,
  pub documentation_complete: bool,
  pub coherence_delta:        Option<f64>,
  pub notes:                  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecution {
  pub command_id:             String,
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

impl NewExecution {
  pub fn new(command_id: impl Into<String>, status: ExecutionStatus) -> Self {
    Self {
      command_id: command_id.into(),
      status,
      started_at: Utc::now(),
      ended_at: None,
      coherence_maintained: false,
      biochemically_verified: false,
      documentation_complete: false,
      coherence_delta: None,
      notes: None,
    }
  }

  pub fn validate(&self) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("command_id", &self.command_id);
    if let Some(end) = self.ended_at
      && end < self.started_at
    {
      v.invalid("ended_at", "precedes started_at");
    }
    if let Some(delta) = self.coherence_delta {
      v.range("coherence_delta", delta, -1.0, 1.0);
    }
    v.finish()
  }

  /// Milliseconds between start and end, when both are known.
  pub fn duration_ms(&self) -> Option<i64> {
    self
      .ended_at
      .map(|end| (end - self.started_at).num_milliseconds())
  }
}

// ─── Documentation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Documentation {
  pub document_id: String,
  pub command_id:  String,
  pub operator_id: String,
  pub title:       String,
  pub body:        String,
  pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocumentation {
  pub command_id: String,
  pub title:      String,
  #[serde(default)]
  pub body:       String,
}

impl NewDocumentation {
  pub fn validate(&self) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("command_id", &self.command_id);
    v.required("title", &self.title);
    v.finish()
  }
}
