//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with nanosecond precision and a
//! `Z` suffix, so they sort lexicographically. Enumerations are stored as
//! their snake_case names (the same strings the CHECK constraints list).
//! Command parameters are stored as a compact JSON object.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use reop_core::command::{Command, Documentation, ExecutionLog};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enumerations ────────────────────────────────────────────────────────────

pub fn decode_variant<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| {
    reop_core::Error::UnknownVariant { kind, value: s.to_owned() }.into()
  })
}

// ─── Parameters ──────────────────────────────────────────────────────────────

pub fn encode_parameters(p: &BTreeMap<String, f64>) -> Result<String> {
  Ok(serde_json::to_string(p)?)
}

pub fn decode_parameters(s: &str) -> Result<BTreeMap<String, f64>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const COMMAND_COLUMNS: &str = "command_id, command_type, status, \
  coherence_index, execution_priority, target_profile_id, operator_id, \
  parameters, created_at, updated_at";

/// Raw values read from a `pure_collapse_commands` row.
pub struct RawCommand {
  pub command_id:         String,
  pub command_type:       String,
  pub status:             String,
  pub coherence_index:    f64,
  pub execution_priority: u8,
  pub target_profile_id:  Option<String>,
  pub operator_id:        String,
  pub parameters:         String,
  pub created_at:         String,
  pub updated_at:         String,
}

impl RawCommand {
  /// Columns in [`COMMAND_COLUMNS`] order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      command_id:         row.get(0)?,
      command_type:       row.get(1)?,
      status:             row.get(2)?,
      coherence_index:    row.get(3)?,
      execution_priority: row.get(4)?,
      target_profile_id:  row.get(5)?,
      operator_id:        row.get(6)?,
      parameters:         row.get(7)?,
      created_at:         row.get(8)?,
      updated_at:         row.get(9)?,
    })
  }

  pub fn into_command(self) -> Result<Command> {
    Ok(Command {
      command_id:         self.command_id,
      command_type:       decode_variant("command_type", &self.command_type)?,
      status:             decode_variant("command_status", &self.status)?,
      coherence_index:    self.coherence_index,
      execution_priority: self.execution_priority,
      target_profile_id:  self.target_profile_id,
      operator_id:        self.operator_id,
      parameters:         decode_parameters(&self.parameters)?,
      created_at:         decode_dt(&self.created_at)?,
      updated_at:         decode_dt(&self.updated_at)?,
    })
  }
}

pub const EXECUTION_COLUMNS: &str = "execution_id, command_id, operator_id, \
  status, started_at, ended_at, duration_ms, coherence_maintained, \
  biochemically_verified, documentation_complete, coherence_delta, notes";

/// Raw values read from a `command_execution_logs` row.
pub struct RawExecution {
  pub execution_id:           String,
  pub command_id:             String,
  pub operator_id:            String,
  pub status:                 String,
  pub started_at:             String,
  pub ended_at:               Option<String>,
  pub duration_ms:            Option<i64>,
  pub coherence_maintained:   bool,
  pub biochemically_verified: bool,
  pub documentation_complete: bool,
  pub coherence_delta:        Option<f64>,
  pub notes:                  Option<String>,
}

impl RawExecution {
  /// Columns in [`EXECUTION_COLUMNS`] order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      execution_id:           row.get(0)?,
      command_id:             row.get(1)?,
      operator_id:            row.get(2)?,
      status:                 row.get(3)?,
      started_at:             row.get(4)?,
      ended_at:               row.get(5)?,
      duration_ms:            row.get(6)?,
      coherence_maintained:   row.get(7)?,
      biochemically_verified: row.get(8)?,
      documentation_complete: row.get(9)?,
      coherence_delta:        row.get(10)?,
      notes:                  row.get(11)?,
    })
  }

  pub fn into_execution(self) -> Result<ExecutionLog> {
    Ok(ExecutionLog {
      execution_id:           self.execution_id,
      command_id:             self.command_id,
      operator_id:            self.operator_id,
      status:                 decode_variant("execution_status", &self.status)?,
      started_at:             decode_dt(&self.started_at)?,
      ended_at:               self.ended_at.as_deref().map(decode_dt).transpose()?,
      duration_ms:            self.duration_ms,
      coherence_maintained:   self.coherence_maintained,
      biochemically_verified: self.biochemically_verified,
      documentation_complete: self.documentation_complete,
      coherence_delta:        self.coherence_delta,
      notes:                  self.notes,
    })
  }
}

/// Raw values read from a `command_documentation` row.
pub struct RawDocumentation {
  pub document_id: String,
  pub command_id:  String,
  pub operator_id: String,
  pub title:       String,
  pub body:        String,
  pub created_at:  String,
}

impl RawDocumentation {
  pub fn into_documentation(self) -> Result<Documentation> {
    Ok(Documentation {
      document_id: self.document_id,
      command_id:  self.command_id,
      operator_id: self.operator_id,
      title:       self.title,
      body:        self.body,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_text() {
    let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let b = a + chrono::Duration::nanoseconds(1);
    assert_eq!(encode_dt(a), "2024-01-02T03:04:05.000000000Z");
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }

  #[test]
  fn unknown_variant_is_reported_by_kind() {
    let err = decode_variant::<reop_core::command::CommandStatus>(
      "command_status",
      "exploded",
    )
    .unwrap_err();
    assert!(err.to_string().contains("command_status"));
  }
}
