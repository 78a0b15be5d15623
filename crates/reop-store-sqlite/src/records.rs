//! [`RecordStore`] implementation.
//!
//! Target profiles and harmonic targets are documents in the `documents`
//! table. A saved profile is mirrored into the relational `target_profiles`
//! table so commands can reference it and row policies can see its owner.
//! Commands, execution logs, documentation and telemetry are relational.

use chrono::Utc;
use reop_core::{
  access::{OperatorContext, PolicyAction},
  command::{
    Command, CommandStatus, Documentation, ExecutionLog, NewCommand,
    NewDocumentation, NewExecution,
  },
  harmonic::HarmonicTarget,
  id::{ensure_id, synthesize_id},
  store::RecordStore,
  target::{ProfilingSession, TargetProfile},
  telemetry::{BiochemicalMarker, CoherenceSample, HarmonicFrequencyLog},
  thresholds::Thresholds,
};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde::de::DeserializeOwned;

use crate::{
  Error, Result, SqliteStore,
  encode::{
    COMMAND_COLUMNS, EXECUTION_COLUMNS, RawCommand, RawDocumentation,
    RawExecution, decode_dt, encode_dt, encode_parameters,
  },
  policy::row_owner,
};

pub const TARGET_COLLECTION: &str = "target_profiles";
pub const HARMONIC_COLLECTION: &str = "harmonic_targets";

// ─── Document helpers ────────────────────────────────────────────────────────

fn load_doc<T: DeserializeOwned>(
  conn: &Connection,
  collection: &str,
  id: &str,
) -> Result<Option<T>> {
  let body: Option<String> = conn
    .query_row(
      "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2",
      params![collection, id],
      |r| r.get(0),
    )
    .optional()?;
  Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

fn upsert_doc(conn: &Connection, collection: &str, id: &str, body: &str) -> Result<()> {
  conn.execute(
    "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)
     ON CONFLICT (collection, doc_id) DO UPDATE SET body = excluded.body",
    params![collection, id, body],
  )?;
  Ok(())
}

// ─── Profile visibility ──────────────────────────────────────────────────────

// Profile documents joined to their relational owner. `?1` is the
// collection, `?2` the owner filter. A document without a mirror row has no
// owner and only shows up when access is unrestricted.
const VISIBLE_PROFILES: &str = "
  FROM documents d
  LEFT JOIN target_profiles t ON t.profile_id = d.doc_id
  WHERE d.collection = ?1 AND (?2 IS NULL OR t.operator_id = ?2)";

fn load_profile(
  conn: &Connection,
  ctx: &OperatorContext,
  profile_id: &str,
) -> Result<Option<TargetProfile>> {
  let owner = row_owner(conn, ctx, "target_profiles", PolicyAction::Select)?;
  let body: Option<String> = conn
    .query_row(
      &format!("SELECT d.body {VISIBLE_PROFILES} AND d.doc_id = ?3"),
      params![TARGET_COLLECTION, owner, profile_id],
      |r| r.get(0),
    )
    .optional()?;
  Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

/// Visible profiles whose numeric field at `path` is at least `min`, highest
/// first. Documents that no longer decode as a profile are logged and
/// skipped.
fn profiles_at_least(
  conn: &Connection,
  ctx: &OperatorContext,
  path: &str,
  min: f64,
) -> Result<Vec<TargetProfile>> {
  let owner = row_owner(conn, ctx, "target_profiles", PolicyAction::Select)?;
  let rows: Vec<(String, String)> = conn
    .prepare(&format!(
      "SELECT d.doc_id, d.body {VISIBLE_PROFILES}
         AND json_extract(d.body, ?3) >= ?4
       ORDER BY json_extract(d.body, ?3) DESC, d.rowid DESC"
    ))?
    .query_map(params![TARGET_COLLECTION, owner, path, min], |r| {
      Ok((r.get(0)?, r.get(1)?))
    })?
    .collect::<rusqlite::Result<_>>()?;

  Ok(
    rows
      .into_iter()
      .filter_map(|(id, body)| match serde_json::from_str(&body) {
        Ok(profile) => Some(profile),
        Err(e) => {
          tracing::warn!(profile_id = %id, error = %e, "skipping undecodable profile");
          None
        }
      })
      .collect(),
  )
}

// ─── Relational helpers ──────────────────────────────────────────────────────

fn profile_owner(conn: &Connection, profile_id: &str) -> Result<Option<String>> {
  Ok(
    conn
      .query_row(
        "SELECT operator_id FROM target_profiles WHERE profile_id = ?1",
        params![profile_id],
        |r| r.get(0),
      )
      .optional()?,
  )
}

fn visible_command(
  conn: &Connection,
  ctx: &OperatorContext,
  command_id: &str,
  action: PolicyAction,
) -> Result<Option<Command>> {
  let owner = row_owner(conn, ctx, "pure_collapse_commands", action)?;
  let raw = conn
    .query_row(
      &format!(
        "SELECT {COMMAND_COLUMNS} FROM pure_collapse_commands
         WHERE command_id = ?1 AND (?2 IS NULL OR operator_id = ?2)"
      ),
      params![command_id, owner],
      RawCommand::from_row,
    )
    .optional()?;
  raw.map(RawCommand::into_command).transpose()
}

fn require_command(
  conn: &Connection,
  ctx: &OperatorContext,
  command_id: &str,
  action: PolicyAction,
) -> Result<Command> {
  visible_command(conn, ctx, command_id, action)?
    .ok_or_else(|| reop_core::Error::CommandNotFound(command_id.to_owned()).into())
}

fn id_taken(conn: &Connection, table: &str, column: &str, id: &str) -> Result<bool> {
  Ok(
    conn
      .query_row(
        &format!("SELECT 1 FROM {table} WHERE {column} = ?1"),
        params![id],
        |_| Ok(()),
      )
      .optional()?
      .is_some(),
  )
}

fn duplicate(id: String) -> Error { reop_core::Error::DuplicateId(id).into() }

// ─── Target profiles ─────────────────────────────────────────────────────────

fn save_profile(
  conn: &mut Connection,
  ctx: &OperatorContext,
  mut profile: TargetProfile,
) -> Result<TargetProfile> {
  let tx = conn.transaction()?;

  let owner = profile_owner(&tx, &profile.profile_id)?;
  let allowed = row_owner(&tx, ctx, "target_profiles", PolicyAction::All)?;
  let existing: Option<TargetProfile> =
    load_doc(&tx, TARGET_COLLECTION, &profile.profile_id)?;

  // An existing document without a mirror row (written by the backfill) is
  // ownerless; only an unrestricted caller may adopt it.
  let hidden = match (&owner, &allowed) {
    (Some(owner), Some(op)) => op != owner,
    (None, Some(_)) => existing.is_some(),
    (_, None) => false,
  };
  if hidden {
    return Err(reop_core::Error::ProfileNotFound(profile.profile_id).into());
  }

  // System saves hand a new mirror row to the operator recorded on the
  // integration block, if any.
  let mirror_owner = match &profile.reop_integration {
    Some(i) if ctx.is_system() => {
      i.operator_id.clone().unwrap_or_else(|| ctx.operator_id.clone())
    }
    _ => ctx.operator_id.clone(),
  };
  let now = Utc::now();
  if let Some(existing) = &existing {
    if !existing.history_preserved_by(&profile) {
      return Err(reop_core::Error::HistoryRewrite(profile.profile_id).into());
    }
    profile.created_at = existing.created_at;
  }
  profile.updated_at = now;

  let body = serde_json::to_string(&profile)?;
  upsert_doc(&tx, TARGET_COLLECTION, &profile.profile_id, &body)?;

  tx.execute(
    "INSERT INTO target_profiles (
         profile_id, name, business_type, lat, lng, radius_m, distance_km,
         verification_ci, operator_id, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
     ON CONFLICT (profile_id) DO UPDATE SET
         name            = excluded.name,
         business_type   = excluded.business_type,
         lat             = excluded.lat,
         lng             = excluded.lng,
         radius_m        = excluded.radius_m,
         distance_km     = excluded.distance_km,
         verification_ci = excluded.verification_ci,
         updated_at      = excluded.updated_at",
    params![
      profile.profile_id,
      profile.name,
      profile.business_type,
      profile.location.lat,
      profile.location.lng,
      profile.location.radius_m,
      profile.distance_km,
      profile.coherence_index,
      mirror_owner,
      encode_dt(profile.created_at),
      encode_dt(profile.updated_at),
    ],
  )?;

  tx.commit()?;
  tracing::debug!(profile_id = %profile.profile_id, "target profile saved");
  Ok(profile)
}

// ─── RecordStore ─────────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  fn thresholds(&self) -> &Thresholds { &self.thresholds }

  // ── Target profiles ───────────────────────────────────────────────────────

  async fn save_target_profile(
    &self,
    ctx: &OperatorContext,
    mut profile: TargetProfile,
  ) -> Result<TargetProfile> {
    profile.ensure_ids();
    profile.validate(&self.thresholds)?;

    let ctx = ctx.clone();
    self.run(move |conn| save_profile(conn, &ctx, profile)).await
  }

  async fn get_target_profile(
    &self,
    ctx: &OperatorContext,
    profile_id: &str,
  ) -> Result<Option<TargetProfile>> {
    let (ctx, id) = (ctx.clone(), profile_id.to_owned());
    self.run(move |conn| load_profile(conn, &ctx, &id)).await
  }

  async fn append_profiling_session(
    &self,
    ctx: &OperatorContext,
    profile_id: &str,
    mut session: ProfilingSession,
  ) -> Result<TargetProfile> {
    let mut profile = self
      .get_target_profile(ctx, profile_id)
      .await?
      .ok_or_else(|| reop_core::Error::ProfileNotFound(profile_id.to_owned()))?;

    ensure_id(&mut session.session_id, "ps");
    profile.profiling_history.push(session);
    self.save_target_profile(ctx, profile).await
  }

  async fn find_by_coherence_threshold(
    &self,
    ctx: &OperatorContext,
    min: f64,
  ) -> Result<Vec<TargetProfile>> {
    let ctx = ctx.clone();
    self
      .run(move |conn| profiles_at_least(conn, &ctx, "$.coherence_index", min))
      .await
  }

  async fn find_by_success_rate_threshold(
    &self,
    ctx: &OperatorContext,
    min: f64,
  ) -> Result<Vec<TargetProfile>> {
    let ctx = ctx.clone();
    self
      .run(move |conn| {
        profiles_at_least(conn, &ctx, "$.operational_experience.success_rate", min)
      })
      .await
  }

  // ── Harmonic targets ──────────────────────────────────────────────────────

  async fn save_harmonic_target(
    &self,
    ctx: &OperatorContext,
    mut target: HarmonicTarget,
  ) -> Result<HarmonicTarget> {
    target.ensure_ids();
    target.validate(&self.thresholds)?;
    if target.operator_id.is_none() && !ctx.is_system() {
      target.operator_id = Some(ctx.operator_id.clone());
    }

    self
      .run(move |conn| {
        let existing: Option<HarmonicTarget> =
          load_doc(conn, HARMONIC_COLLECTION, &target.target_id)?;
        if let Some(existing) = existing {
          target.created_at = existing.created_at;
        }
        target.updated_at = Utc::now();

        let body = serde_json::to_string(&target)?;
        upsert_doc(conn, HARMONIC_COLLECTION, &target.target_id, &body)?;
        Ok(target)
      })
      .await
  }

  async fn find_active_manifestations(&self) -> Result<Vec<HarmonicTarget>> {
    self
      .run(|conn| {
        let bodies: Vec<String> = conn
          .prepare(
            "SELECT body FROM documents
             WHERE collection = ?1
               AND json_extract(body, '$.manifestation_status') = 'active'
             ORDER BY json_extract(body, '$.harmonic_resonance_score') DESC,
                      rowid DESC",
          )?
          .query_map(params![HARMONIC_COLLECTION], |r| r.get(0))?
          .collect::<rusqlite::Result<_>>()?;

        bodies
          .iter()
          .map(|b| Ok(serde_json::from_str(b)?))
          .collect()
      })
      .await
  }

  // ── Commands ──────────────────────────────────────────────────────────────

  async fn create_command(
    &self,
    ctx: &OperatorContext,
    input: NewCommand,
  ) -> Result<Command> {
    let now = Utc::now();
    let command = Command {
      command_id:         input
        .command_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| synthesize_id("cmd")),
      command_type:       input.command_type,
      status:             CommandStatus::Pending,
      coherence_index:    input.coherence_index,
      execution_priority: input.execution_priority,
      target_profile_id:  input.target_profile_id,
      operator_id:        ctx.operator_id.clone(),
      parameters:         input.parameters,
      created_at:         now,
      updated_at:         now,
    };
    command.validate(&self.thresholds)?;
    let parameters = encode_parameters(&command.parameters)?;

    let ctx = ctx.clone();
    self
      .run(move |conn| {
        let tx = conn.transaction()?;

        if let Some(profile_id) = &command.target_profile_id {
          let owner = row_owner(&tx, &ctx, "target_profiles", PolicyAction::Select)?;
          let visible = tx
            .query_row(
              "SELECT 1 FROM target_profiles
               WHERE profile_id = ?1 AND (?2 IS NULL OR operator_id = ?2)",
              params![profile_id, owner],
              |_| Ok(()),
            )
            .optional()?
            .is_some();
          if !visible {
            return Err(reop_core::Error::ProfileNotFound(profile_id.clone()).into());
          }
        }
        if id_taken(&tx, "pure_collapse_commands", "command_id", &command.command_id)? {
          return Err(duplicate(command.command_id));
        }

        tx.execute(
          "INSERT INTO pure_collapse_commands (
               command_id, command_type, status, coherence_index,
               execution_priority, target_profile_id, operator_id, parameters,
               created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          params![
            command.command_id,
            command.command_type.to_string(),
            command.status.to_string(),
            command.coherence_index,
            command.execution_priority,
            command.target_profile_id,
            command.operator_id,
            parameters,
            encode_dt(command.created_at),
            encode_dt(command.updated_at),
          ],
        )?;
        tx.commit()?;
        tracing::info!(command_id = %command.command_id, "command created");
        Ok(command)
      })
      .await
  }

  async fn get_command(
    &self,
    ctx: &OperatorContext,
    command_id: &str,
  ) -> Result<Option<Command>> {
    let (ctx, id) = (ctx.clone(), command_id.to_owned());
    self
      .run(move |conn| visible_command(conn, &ctx, &id, PolicyAction::Select))
      .await
  }

  async fn find_by_operator(
    &self,
    ctx: &OperatorContext,
    operator_id: &str,
  ) -> Result<Vec<Command>> {
    let (ctx, operator_id) = (ctx.clone(), operator_id.to_owned());
    self
      .run(move |conn| {
        let owner =
          row_owner(conn, &ctx, "pure_collapse_commands", PolicyAction::Select)?;
        let raws = conn
          .prepare(&format!(
            "SELECT {COMMAND_COLUMNS} FROM pure_collapse_commands
             WHERE operator_id = ?1 AND (?2 IS NULL OR operator_id = ?2)
             ORDER BY created_at DESC, id DESC"
          ))?
          .query_map(params![operator_id, owner], RawCommand::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawCommand::into_command).collect()
      })
      .await
  }

  async fn transition_command(
    &self,
    ctx: &OperatorContext,
    command_id: &str,
    to: CommandStatus,
  ) -> Result<Command> {
    let (ctx, id) = (ctx.clone(), command_id.to_owned());
    self
      .run(move |conn| {
        let tx = conn.transaction()?;
        let mut command = require_command(&tx, &ctx, &id, PolicyAction::All)?;

        if !command.status.can_transition_to(to) {
          return Err(
            reop_core::Error::InvalidTransition { id, from: command.status, to }
              .into(),
          );
        }

        command.status = to;
        command.updated_at = Utc::now();
        tx.execute(
          "UPDATE pure_collapse_commands SET status = ?2, updated_at = ?3
           WHERE command_id = ?1",
          params![id, to.to_string(), encode_dt(command.updated_at)],
        )?;
        tx.commit()?;
        tracing::info!(command_id = %id, status = %to, "command transitioned");
        Ok(command)
      })
      .await
  }

  // ── Execution logs and documentation ──────────────────────────────────────

  async fn record_execution(
    &self,
    ctx: &OperatorContext,
    input: NewExecution,
  ) -> Result<ExecutionLog> {
    input.validate()?;
    let log = ExecutionLog {
      execution_id:           synthesize_id("exe"),
      command_id:             input.command_id.clone(),
      operator_id:            ctx.operator_id.clone(),
      status:                 input.status,
      started_at:             input.started_at,
      ended_at:               input.ended_at,
      duration_ms:            input.duration_ms(),
      coherence_maintained:   input.coherence_maintained,
      biochemically_verified: input.biochemically_verified,
      documentation_complete: input.documentation_complete,
      coherence_delta:        input.coherence_delta,
      notes:                  input.notes,
    };

    let ctx = ctx.clone();
    self
      .run(move |conn| {
        require_command(conn, &ctx, &log.command_id, PolicyAction::Insert)?;
        conn.execute(
          &format!(
            "INSERT INTO command_execution_logs ({EXECUTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          params![
            log.execution_id,
            log.command_id,
            log.operator_id,
            log.status.to_string(),
            encode_dt(log.started_at),
            log.ended_at.map(encode_dt),
            log.duration_ms,
            log.coherence_maintained,
            log.biochemically_verified,
            log.documentation_complete,
            log.coherence_delta,
            log.notes,
          ],
        )?;
        Ok(log)
      })
      .await
  }

  async fn executions_for(
    &self,
    ctx: &OperatorContext,
    command_id: &str,
  ) -> Result<Vec<ExecutionLog>> {
    let (ctx, id) = (ctx.clone(), command_id.to_owned());
    self
      .run(move |conn| {
        let owner =
          row_owner(conn, &ctx, "command_execution_logs", PolicyAction::Select)?;
        let raws = conn
          .prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM command_execution_logs
             WHERE command_id = ?1 AND (?2 IS NULL OR operator_id = ?2)
             ORDER BY started_at, id"
          ))?
          .query_map(params![id, owner], RawExecution::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawExecution::into_execution).collect()
      })
      .await
  }

  async fn attach_documentation(
    &self,
    ctx: &OperatorContext,
    input: NewDocumentation,
  ) -> Result<Documentation> {
    input.validate()?;
    let doc = Documentation {
      document_id: synthesize_id("doc"),
      command_id:  input.command_id,
      operator_id: ctx.operator_id.clone(),
      title:       input.title,
      body:        input.body,
      created_at:  Utc::now(),
    };

    let ctx = ctx.clone();
    self
      .run(move |conn| {
        require_command(conn, &ctx, &doc.command_id, PolicyAction::Insert)?;
        conn.execute(
          "INSERT INTO command_documentation (
               document_id, command_id, operator_id, title, body, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            doc.document_id,
            doc.command_id,
            doc.operator_id,
            doc.title,
            doc.body,
            encode_dt(doc.created_at),
          ],
        )?;
        Ok(doc)
      })
      .await
  }

  async fn documentation_for(
    &self,
    ctx: &OperatorContext,
    command_id: &str,
  ) -> Result<Vec<Documentation>> {
    let (ctx, id) = (ctx.clone(), command_id.to_owned());
    self
      .run(move |conn| {
        let owner =
          row_owner(conn, &ctx, "command_documentation", PolicyAction::Select)?;
        let raws = conn
          .prepare(
            "SELECT document_id, command_id, operator_id, title, body, created_at
             FROM command_documentation
             WHERE command_id = ?1 AND (?2 IS NULL OR operator_id = ?2)
             ORDER BY created_at, id",
          )?
          .query_map(params![id, owner], |row| {
            Ok(RawDocumentation {
              document_id: row.get(0)?,
              command_id:  row.get(1)?,
              operator_id: row.get(2)?,
              title:       row.get(3)?,
              body:        row.get(4)?,
              created_at:  row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawDocumentation::into_documentation).collect()
      })
      .await
  }

  // ── Telemetry ─────────────────────────────────────────────────────────────

  async fn record_harmonic_frequency(
    &self,
    mut log: HarmonicFrequencyLog,
  ) -> Result<HarmonicFrequencyLog> {
    log.validate()?;
    ensure_id(&mut log.harmonic_id, "hf");

    self
      .run(move |conn| {
        if id_taken(conn, "harmonic_frequency_logs", "harmonic_id", &log.harmonic_id)? {
          return Err(duplicate(log.harmonic_id));
        }
        conn.execute(
          "INSERT INTO harmonic_frequency_logs (
               harmonic_id, command_id, frequency_hz, amplitude, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          params![
            log.harmonic_id,
            log.command_id,
            log.frequency_hz,
            log.amplitude,
            encode_dt(log.recorded_at),
          ],
        )?;
        Ok(log)
      })
      .await
  }

  async fn record_coherence_sample(
    &self,
    mut sample: CoherenceSample,
  ) -> Result<CoherenceSample> {
    sample.validate()?;
    ensure_id(&mut sample.log_id, "cil");

    self
      .run(move |conn| {
        conn.execute(
          "INSERT INTO coherence_index_logs (
               log_id, profile_id, coherence_index, recorded_at
           ) VALUES (?1, ?2, ?3, ?4)",
          params![
            sample.log_id,
            sample.profile_id,
            sample.coherence_index,
            encode_dt(sample.recorded_at),
          ],
        )?;
        Ok(sample)
      })
      .await
  }

  async fn record_biochemical_marker(
    &self,
    mut marker: BiochemicalMarker,
  ) -> Result<BiochemicalMarker> {
    marker.validate()?;
    ensure_id(&mut marker.tracking_id, "bt");

    self
      .run(move |conn| {
        conn.execute(
          "INSERT INTO biochemical_tracking (
               tracking_id, profile_id, marker, value, unit, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            marker.tracking_id,
            marker.profile_id,
            marker.marker,
            marker.value,
            marker.unit,
            encode_dt(marker.recorded_at),
          ],
        )?;
        Ok(marker)
      })
      .await
  }

  async fn coherence_samples(&self, profile_id: &str) -> Result<Vec<CoherenceSample>> {
    let id = profile_id.to_owned();
    self
      .run(move |conn| {
        let rows: Vec<(String, Option<String>, f64, String)> = conn
          .prepare(
            "SELECT log_id, profile_id, coherence_index, recorded_at
             FROM coherence_index_logs
             WHERE profile_id = ?1
             ORDER BY recorded_at, id",
          )?
          .query_map(params![id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
          })?
          .collect::<rusqlite::Result<_>>()?;

        rows
          .into_iter()
          .map(|(log_id, profile_id, coherence_index, at)| {
            Ok(CoherenceSample {
              log_id,
              profile_id,
              coherence_index,
              recorded_at: decode_dt(&at)?,
            })
          })
          .collect()
      })
      .await
  }
}
