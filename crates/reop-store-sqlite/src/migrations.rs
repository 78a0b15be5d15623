//! Numbered relational migrations with explicit `up` and `down` steps.
//!
//! Each migration runs inside its own transaction together with its
//! `schema_migrations` bookkeeping row, so a failing step leaves the schema
//! at the previous version. `down` steps reverse their `up` in strict inverse
//! order (policies, then columns, then tables) and guard every drop, so they
//! can be re-run after a partial failure.

use chrono::{DateTime, Utc};
use reop_core::access::ROW_POLICIES;
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{Error, Result, encode::decode_dt, encode::encode_dt};

/// A single schema step.
pub struct Migration {
  pub version: u32,
  pub name:    &'static str,
  up:          fn(&Connection) -> rusqlite::Result<()>,
  down:        fn(&Connection) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    name:    "create_target_profiles",
    up:      |c| c.execute_batch(TARGET_PROFILES_UP),
    down:    |c| c.execute_batch(TARGET_PROFILES_DOWN),
  },
  Migration {
    version: 2,
    name:    "create_pure_collapse_commands",
    up:      |c| c.execute_batch(COMMANDS_UP),
    down:    |c| c.execute_batch(COMMANDS_DOWN),
  },
  Migration {
    version: 3,
    name:    "create_command_execution_logs",
    up:      |c| c.execute_batch(EXECUTION_LOGS_UP),
    down:    |c| c.execute_batch(EXECUTION_LOGS_DOWN),
  },
  Migration {
    version: 4,
    name:    "create_telemetry_tables",
    up:      |c| c.execute_batch(TELEMETRY_UP),
    down:    |c| c.execute_batch(TELEMETRY_DOWN),
  },
  Migration {
    version: 5,
    name:    "create_command_documentation",
    up:      |c| c.execute_batch(DOCUMENTATION_UP),
    down:    |c| c.execute_batch(DOCUMENTATION_DOWN),
  },
  Migration {
    version: 6,
    name:    "enable_row_security",
    up:      row_security_up,
    down:    row_security_down,
  },
];

/// The highest version this build knows about.
pub fn latest_version() -> u32 {
  MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

// ─── 001 target_profiles ─────────────────────────────────────────────────────

const TARGET_PROFILES_UP: &str = "
CREATE TABLE IF NOT EXISTS target_profiles (
    profile_id      TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    business_type   TEXT NOT NULL,
    lat             REAL NOT NULL CHECK (lat BETWEEN -90 AND 90),
    lng             REAL NOT NULL CHECK (lng BETWEEN -180 AND 180),
    radius_m        REAL NOT NULL CHECK (radius_m > 0),
    distance_km     REAL NOT NULL DEFAULT 0,
    verification_ci REAL NOT NULL CHECK (verification_ci >= 0.7 AND verification_ci <= 1),
    operator_id     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS target_profiles_operator_idx ON target_profiles(operator_id);
CREATE INDEX IF NOT EXISTS target_profiles_ci_idx       ON target_profiles(verification_ci);
";

const TARGET_PROFILES_DOWN: &str = "
DROP INDEX IF EXISTS target_profiles_ci_idx;
DROP INDEX IF EXISTS target_profiles_operator_idx;
DROP TABLE IF EXISTS target_profiles;
";

// ─── 002 pure_collapse_commands ──────────────────────────────────────────────

const COMMANDS_UP: &str = "
CREATE TABLE IF NOT EXISTS pure_collapse_commands (
    id                 INTEGER PRIMARY KEY,
    command_id         TEXT NOT NULL,
    command_type       TEXT NOT NULL CHECK (command_type IN (
                         'harmonic_alignment', 'coherence_restoration',
                         'frequency_calibration', 'biochemical_rebalance',
                         'field_stabilization', 'pure_collapse')),
    status             TEXT NOT NULL DEFAULT 'pending' CHECK (status IN (
                         'pending', 'processing', 'executing',
                         'completed', 'failed', 'cancelled')),
    coherence_index    REAL NOT NULL CHECK (coherence_index BETWEEN 0 AND 1),
    execution_priority INTEGER NOT NULL DEFAULT 5
                         CHECK (execution_priority BETWEEN 1 AND 10),
    target_profile_id  TEXT REFERENCES target_profiles(profile_id) ON DELETE SET NULL,
    operator_id        TEXT NOT NULL,
    parameters         TEXT NOT NULL DEFAULT '{}',   -- JSON object of numbers
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS pure_collapse_commands_command_id_uq
    ON pure_collapse_commands(command_id);
CREATE INDEX IF NOT EXISTS pure_collapse_commands_operator_idx
    ON pure_collapse_commands(operator_id);
CREATE INDEX IF NOT EXISTS pure_collapse_commands_status_idx
    ON pure_collapse_commands(status);
CREATE INDEX IF NOT EXISTS pure_collapse_commands_target_idx
    ON pure_collapse_commands(target_profile_id);
";

const COMMANDS_DOWN: &str = "
DROP INDEX IF EXISTS pure_collapse_commands_target_idx;
DROP INDEX IF EXISTS pure_collapse_commands_status_idx;
DROP INDEX IF EXISTS pure_collapse_commands_operator_idx;
DROP INDEX IF EXISTS pure_collapse_commands_command_id_uq;
DROP TABLE IF EXISTS pure_collapse_commands;
";

// ─── 003 command_execution_logs ──────────────────────────────────────────────

const EXECUTION_LOGS_UP: &str = "
CREATE TABLE IF NOT EXISTS command_execution_logs (
    id                     INTEGER PRIMARY KEY,
    execution_id           TEXT NOT NULL,
    command_id             TEXT NOT NULL
                             REFERENCES pure_collapse_commands(command_id) ON DELETE CASCADE,
    operator_id            TEXT NOT NULL,
    status                 TEXT NOT NULL CHECK (status IN (
                             'started', 'running', 'succeeded', 'failed', 'aborted')),
    started_at             TEXT NOT NULL,
    ended_at               TEXT,
    duration_ms            INTEGER,
    coherence_maintained   INTEGER NOT NULL DEFAULT 0,
    biochemically_verified INTEGER NOT NULL DEFAULT 0,
    documentation_complete INTEGER NOT NULL DEFAULT 0,
    notes                  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS command_execution_logs_execution_id_uq
    ON command_execution_logs(execution_id);
CREATE INDEX IF NOT EXISTS command_execution_logs_command_idx
    ON command_execution_logs(command_id, started_at);
";

const EXECUTION_LOGS_DOWN: &str = "
DROP INDEX IF EXISTS command_execution_logs_command_idx;
DROP INDEX IF EXISTS command_execution_logs_execution_id_uq;
DROP TABLE IF EXISTS command_execution_logs;
";

// ─── 004 telemetry ───────────────────────────────────────────────────────────

const TELEMETRY_UP: &str = "
CREATE TABLE IF NOT EXISTS harmonic_frequency_logs (
    id           INTEGER PRIMARY KEY,
    harmonic_id  TEXT NOT NULL,
    command_id   TEXT,
    frequency_hz REAL NOT NULL CHECK (frequency_hz >= 0),
    amplitude    REAL NOT NULL DEFAULT 0,
    recorded_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS harmonic_frequency_logs_harmonic_id_uq
    ON harmonic_frequency_logs(harmonic_id);

CREATE TABLE IF NOT EXISTS coherence_index_logs (
    id              INTEGER PRIMARY KEY,
    log_id          TEXT NOT NULL,
    profile_id      TEXT,
    coherence_index REAL NOT NULL CHECK (coherence_index BETWEEN 0 AND 1),
    recorded_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS coherence_index_logs_profile_idx
    ON coherence_index_logs(profile_id, recorded_at);

CREATE TABLE IF NOT EXISTS biochemical_tracking (
    id          INTEGER PRIMARY KEY,
    tracking_id TEXT NOT NULL,
    profile_id  TEXT,
    marker      TEXT NOT NULL,
    value       REAL NOT NULL,
    unit        TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS biochemical_tracking_profile_idx
    ON biochemical_tracking(profile_id, marker);
";

const TELEMETRY_DOWN: &str = "
DROP INDEX IF EXISTS biochemical_tracking_profile_idx;
DROP TABLE IF EXISTS biochemical_tracking;
DROP INDEX IF EXISTS coherence_index_logs_profile_idx;
DROP TABLE IF EXISTS coherence_index_logs;
DROP INDEX IF EXISTS harmonic_frequency_logs_harmonic_id_uq;
DROP TABLE IF EXISTS harmonic_frequency_logs;
";

// ─── 005 command_documentation ───────────────────────────────────────────────

const DOCUMENTATION_UP: &str = "
CREATE TABLE IF NOT EXISTS command_documentation (
    id          INTEGER PRIMARY KEY,
    document_id TEXT NOT NULL,
    command_id  TEXT NOT NULL
                  REFERENCES pure_collapse_commands(command_id) ON DELETE CASCADE,
    operator_id TEXT NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS command_documentation_document_id_uq
    ON command_documentation(document_id);
CREATE INDEX IF NOT EXISTS command_documentation_command_idx
    ON command_documentation(command_id);
";

const DOCUMENTATION_DOWN: &str = "
DROP INDEX IF EXISTS command_documentation_command_idx;
DROP INDEX IF EXISTS command_documentation_document_id_uq;
DROP TABLE IF EXISTS command_documentation;
";

// ─── 006 row security ────────────────────────────────────────────────────────

const ROW_POLICIES_TABLE_UP: &str = "
CREATE TABLE IF NOT EXISTS row_policies (
    policy_name TEXT PRIMARY KEY,
    table_name  TEXT NOT NULL,
    action      TEXT NOT NULL CHECK (action IN ('select', 'insert', 'all')),
    predicate   TEXT NOT NULL CHECK (predicate IN ('operator_self', 'always'))
);
CREATE INDEX IF NOT EXISTS row_policies_table_idx ON row_policies(table_name);
";

fn row_security_up(c: &Connection) -> rusqlite::Result<()> {
  c.execute_batch(ROW_POLICIES_TABLE_UP)?;

  if !column_exists(c, "command_execution_logs", "coherence_delta")? {
    c.execute_batch(
      "ALTER TABLE command_execution_logs ADD COLUMN coherence_delta REAL",
    )?;
  }

  let mut stmt = c.prepare(
    "INSERT OR REPLACE INTO row_policies (policy_name, table_name, action, predicate)
     VALUES (?1, ?2, ?3, ?4)",
  )?;
  for p in ROW_POLICIES {
    stmt.execute(params![
      p.name,
      p.table,
      p.action.to_string(),
      p.predicate.to_string(),
    ])?;
  }
  Ok(())
}

fn row_security_down(c: &Connection) -> rusqlite::Result<()> {
  if table_exists(c, "row_policies")? {
    c.execute("DELETE FROM row_policies", [])?;
  }
  if column_exists(c, "command_execution_logs", "coherence_delta")? {
    c.execute_batch("ALTER TABLE command_execution_logs DROP COLUMN coherence_delta")?;
  }
  c.execute_batch(
    "DROP INDEX IF EXISTS row_policies_table_idx;
     DROP TABLE IF EXISTS row_policies;",
  )
}

// ─── Introspection helpers ───────────────────────────────────────────────────

pub(crate) fn table_exists(c: &Connection, table: &str) -> rusqlite::Result<bool> {
  c.query_row(
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
    params![table],
    |_| Ok(()),
  )
  .optional()
  .map(|r| r.is_some())
}

pub(crate) fn column_exists(
  c: &Connection,
  table: &str,
  column: &str,
) -> rusqlite::Result<bool> {
  c.query_row(
    "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
    params![table, column],
    |_| Ok(()),
  )
  .optional()
  .map(|r| r.is_some())
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// A row of `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
  pub version:    u32,
  pub name:       String,
  pub applied_at: DateTime<Utc>,
}

fn ensure_bookkeeping(c: &Connection) -> Result<()> {
  c.execute_batch(
    "CREATE TABLE IF NOT EXISTS schema_migrations (
         version    INTEGER PRIMARY KEY,
         name       TEXT NOT NULL,
         applied_at TEXT NOT NULL
     );",
  )?;
  Ok(())
}

pub(crate) fn current_version(c: &Connection) -> Result<u32> {
  ensure_bookkeeping(c)?;
  Ok(c.query_row(
    "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
    [],
    |r| r.get(0),
  )?)
}

pub(crate) fn applied(c: &Connection) -> Result<Vec<AppliedMigration>> {
  ensure_bookkeeping(c)?;
  let mut stmt = c.prepare(
    "SELECT version, name, applied_at FROM schema_migrations ORDER BY version",
  )?;
  let rows = stmt
    .query_map([], |r| {
      Ok((r.get::<_, u32>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  rows
    .into_iter()
    .map(|(version, name, at)| {
      Ok(AppliedMigration { version, name, applied_at: decode_dt(&at)? })
    })
    .collect()
}

/// Apply every pending migration in ascending order. Returns the versions
/// applied.
pub(crate) fn migrate_up(c: &mut Connection) -> Result<Vec<u32>> {
  let current = current_version(c)?;
  let known = latest_version();
  if current > known {
    return Err(Error::SchemaTooNew { found: current, known });
  }

  let mut done = Vec::new();
  for m in MIGRATIONS.iter().filter(|m| m.version > current) {
    let tx = c.transaction()?;
    (m.up)(&tx)?;
    tx.execute(
      "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
      params![m.version, m.name, encode_dt(Utc::now())],
    )?;
    tx.commit()?;
    tracing::info!(version = m.version, name = m.name, "migration applied");
    done.push(m.version);
  }
  Ok(done)
}

/// Revert applied migrations above `target`, newest first. Returns the
/// versions reverted.
pub(crate) fn migrate_down(c: &mut Connection, target: u32) -> Result<Vec<u32>> {
  let to_revert: Vec<u32> = applied(c)?
    .into_iter()
    .map(|a| a.version)
    .filter(|v| *v > target)
    .rev()
    .collect();

  let mut done = Vec::new();
  for version in to_revert {
    let m = MIGRATIONS
      .iter()
      .find(|m| m.version == version)
      .ok_or(Error::UnknownMigration(version))?;

    let tx = c.transaction()?;
    (m.down)(&tx)?;
    tx.execute("DELETE FROM schema_migrations WHERE version = ?1", params![version])?;
    tx.commit()?;
    tracing::info!(version, name = m.name, "migration reverted");
    done.push(version);
  }
  Ok(done)
}

// ─── Structural snapshot ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
  pub name:      String,
  pub decl_type: String,
  pub not_null:  bool,
  pub default:   Option<String>,
  pub pk:        i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexShape {
  pub name:    String,
  pub unique:  bool,
  pub partial: bool,
  pub columns: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyShape {
  pub from:      String,
  pub table:     String,
  pub to:        String,
  pub on_delete: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
  pub name:         String,
  pub columns:      Vec<ColumnShape>,
  pub indexes:      Vec<IndexShape>,
  pub foreign_keys: Vec<ForeignKeyShape>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRow {
  pub policy_name: String,
  pub table_name:  String,
  pub action:      String,
  pub predicate:   String,
}

/// Structural description of the relational schema, comparable with `==`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
  pub tables:   Vec<TableShape>,
  pub policies: Vec<PolicyRow>,
}

impl SchemaSnapshot {
  pub fn table(&self, name: &str) -> Option<&TableShape> {
    self.tables.iter().find(|t| t.name == name)
  }
}

pub(crate) fn snapshot(c: &Connection) -> Result<SchemaSnapshot> {
  let names: Vec<String> = c
    .prepare(
      "SELECT name FROM sqlite_master
       WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
       ORDER BY name",
    )?
    .query_map([], |r| r.get(0))?
    .collect::<rusqlite::Result<_>>()?;

  let mut tables = Vec::with_capacity(names.len());
  for name in names {
    let columns = c
      .prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk
         FROM pragma_table_info(?1) ORDER BY cid",
      )?
      .query_map(params![name], |r| {
        Ok(ColumnShape {
          name:      r.get(0)?,
          decl_type: r.get(1)?,
          not_null:  r.get(2)?,
          default:   r.get(3)?,
          pk:        r.get(4)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let index_heads: Vec<(String, bool, bool)> = c
      .prepare(
        "SELECT name, \"unique\", partial FROM pragma_index_list(?1) ORDER BY name",
      )?
      .query_map(params![name], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
      .collect::<rusqlite::Result<_>>()?;

    let mut indexes = Vec::with_capacity(index_heads.len());
    for (index_name, unique, partial) in index_heads {
      let columns = c
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?
        .query_map(params![index_name], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<Option<String>>>>()?;
      indexes.push(IndexShape { name: index_name, unique, partial, columns });
    }

    let foreign_keys = c
      .prepare(
        "SELECT \"from\", \"table\", \"to\", on_delete
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
      )?
      .query_map(params![name], |r| {
        Ok(ForeignKeyShape {
          from:      r.get(0)?,
          table:     r.get(1)?,
          to:        r.get::<_, Option<String>>(2)?.unwrap_or_default(),
          on_delete: r.get(3)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    tables.push(TableShape { name, columns, indexes, foreign_keys });
  }

  let policies = if table_exists(c, "row_policies")? {
    c.prepare(
      "SELECT policy_name, table_name, action, predicate
       FROM row_policies ORDER BY policy_name",
    )?
    .query_map([], |r| {
      Ok(PolicyRow {
        policy_name: r.get(0)?,
        table_name:  r.get(1)?,
        action:      r.get(2)?,
        predicate:   r.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?
  } else {
    Vec::new()
  };

  Ok(SchemaSnapshot { tables, policies })
}
