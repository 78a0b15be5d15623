//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::Utc;
use reop_core::{
  Classify as _, ErrorClass,
  access::OperatorContext,
  backfill::{self, BackfillError, BackfillOptions, INDEXES},
  command::{
    CommandStatus, CommandType, ExecutionStatus, NewCommand, NewDocumentation,
    NewExecution,
  },
  document::{Document, DocumentFilter, DocumentStore as _},
  harmonic::HarmonicTarget,
  store::RecordStore as _,
  target::{
    Location, ManifestationStatus, ProfilingSession, SessionType, TargetProfile,
  },
  telemetry::{BiochemicalMarker, CoherenceSample, HarmonicFrequencyLog},
};
use serde_json::{Value, json};
use strum::IntoEnumIterator as _;

use crate::{Error, SqliteStore, TARGET_COLLECTION, migrations::latest_version};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn location() -> Location { Location { lat: 52.52, lng: 13.40, radius_m: 250.0 } }

fn profile(name: &str, ci: f64) -> TargetProfile {
  TargetProfile::new(name, "retail", location(), ci)
}

fn op(id: &str) -> OperatorContext { OperatorContext::operator(id) }

async fn count_indexes(s: &SqliteStore, prefix: &str) -> i64 {
  let pattern = format!("{prefix}%");
  s.run(move |conn| {
    Ok(conn.query_row(
      "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE ?1",
      [pattern],
      |r| r.get(0),
    )?)
  })
  .await
  .unwrap()
}

async fn exec(s: &SqliteStore, sql: &'static str) -> crate::Result<()> {
  s.run(move |conn| {
    conn.execute_batch(sql)?;
    Ok(())
  })
  .await
}

// ─── Migrations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_store_is_fully_migrated() {
  let s = store().await;
  assert_eq!(s.schema_version().await.unwrap(), latest_version());

  let applied = s.applied_migrations().await.unwrap();
  let versions: Vec<u32> = applied.iter().map(|a| a.version).collect();
  assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);
  assert_eq!(applied[5].name, "enable_row_security");

  let snap = s.schema_snapshot().await.unwrap();
  for table in [
    "target_profiles",
    "pure_collapse_commands",
    "command_execution_logs",
    "harmonic_frequency_logs",
    "coherence_index_logs",
    "biochemical_tracking",
    "command_documentation",
    "row_policies",
  ] {
    assert!(snap.table(table).is_some(), "missing table {table}");
  }
  assert_eq!(snap.policies.len(), 7);
}

#[tokio::test]
async fn migrate_up_is_a_no_op_when_current() {
  let s = store().await;
  assert!(s.migrate_up().await.unwrap().is_empty());
}

#[tokio::test]
async fn up_down_up_restores_identical_schema() {
  let s = store().await;
  let before = s.schema_snapshot().await.unwrap();

  let reverted = s.migrate_down(0).await.unwrap();
  assert_eq!(reverted, vec![6, 5, 4, 3, 2, 1]);
  let empty = s.schema_snapshot().await.unwrap();
  assert!(empty.table("target_profiles").is_none());
  assert!(empty.policies.is_empty());

  let applied = s.migrate_up().await.unwrap();
  assert_eq!(applied, vec![1, 2, 3, 4, 5, 6]);
  assert_eq!(s.schema_snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn reverting_row_security_drops_policies_then_column() {
  let s = store().await;
  s.migrate_down(5).await.unwrap();

  let snap = s.schema_snapshot().await.unwrap();
  assert!(snap.policies.is_empty());
  assert!(snap.table("row_policies").is_none());
  let logs = snap.table("command_execution_logs").unwrap();
  assert!(!logs.columns.iter().any(|c| c.name == "coherence_delta"));
  assert_eq!(s.schema_version().await.unwrap(), 5);
}

#[tokio::test]
async fn down_tolerates_partially_reverted_schema() {
  let s = store().await;
  exec(
    &s,
    "ALTER TABLE command_execution_logs DROP COLUMN coherence_delta;
     DROP TABLE row_policies;",
  )
  .await
  .unwrap();

  assert_eq!(s.migrate_down(5).await.unwrap(), vec![6]);
  assert_eq!(s.migrate_up().await.unwrap(), vec![6]);
}

#[tokio::test]
async fn newer_database_is_refused() {
  let s = store().await;
  exec(
    &s,
    "INSERT INTO schema_migrations (version, name, applied_at)
     VALUES (99, 'from_the_future', '2030-01-01T00:00:00.000000Z')",
  )
  .await
  .unwrap();

  let err = s.migrate_up().await.unwrap_err();
  assert!(matches!(err, Error::SchemaTooNew { found: 99, .. }));
}

#[tokio::test]
async fn unmigrated_store_has_no_relational_tables() {
  let s = SqliteStore::open_in_memory_unmigrated().await.unwrap();
  assert_eq!(s.schema_version().await.unwrap(), 0);
  assert!(s.schema_snapshot().await.unwrap().table("target_profiles").is_none());
}

#[tokio::test]
async fn command_enum_checks_match_domain_enums() {
  let s = store().await;
  let ctx = op("op-1");
  for kind in CommandType::iter() {
    let cmd = s.create_command(&ctx, NewCommand::new(kind, 0.8)).await.unwrap();
    assert_eq!(cmd.command_type, kind);
  }

  let err = exec(
    &s,
    "INSERT INTO pure_collapse_commands (
         command_id, command_type, status, coherence_index, operator_id,
         created_at, updated_at)
     VALUES ('x', 'teleport', 'pending', 0.8, 'op-1', 'now', 'now')",
  )
  .await;
  assert!(err.is_err());

  // Every status the domain knows is accepted by the CHECK constraint.
  for status in CommandStatus::iter() {
    let sql = format!(
      "UPDATE pure_collapse_commands SET status = '{status}' WHERE operator_id = 'op-1'"
    );
    s.run(move |conn| {
      conn.execute_batch(&sql)?;
      Ok(())
    })
    .await
    .unwrap();
  }
}

// ─── Document store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn document_field_updates_and_counts() {
  let s = store().await;
  s.insert_document("things", Document { id: "a".into(), body: json!({"n": 1}) })
    .await
    .unwrap();
  s.insert_document("things", Document { id: "b".into(), body: json!({"n": 0.2}) })
    .await
    .unwrap();

  let mut fields = serde_json::Map::new();
  fields.insert("nested".into(), json!({"x": 0.9}));
  fields.insert("label".into(), json!("alpha"));
  s.set_fields("things", "a", fields).await.unwrap();

  let docs = s.load_all("things").await.unwrap();
  assert_eq!(docs[0].body["nested"]["x"], json!(0.9));
  assert_eq!(docs[0].body["label"], json!("alpha"));

  let missing = DocumentFilter::MissingAny(vec!["nested.x".into()]);
  assert_eq!(s.count_matching("things", &missing).await.unwrap(), 1);
  let below = DocumentFilter::Below { path: "n".into(), threshold: 0.5 };
  assert_eq!(s.count_matching("things", &below).await.unwrap(), 1);
  let above = DocumentFilter::Above { path: "n".into(), threshold: 0.5 };
  assert_eq!(s.count_matching("things", &above).await.unwrap(), 1);
  let above = DocumentFilter::Above { path: "n".into(), threshold: 1.0 };
  assert_eq!(s.count_matching("things", &above).await.unwrap(), 0);

  assert_eq!(s.unset_fields("things", &["nested", "label"]).await.unwrap(), 1);
  assert_eq!(s.unset_fields("things", &["nested", "label"]).await.unwrap(), 0);
}

#[tokio::test]
async fn set_fields_on_missing_document_fails() {
  let s = store().await;
  let mut fields = serde_json::Map::new();
  fields.insert("x".into(), json!(1));
  let err = s.set_fields("things", "nope", fields).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn unsafe_names_are_rejected() {
  let s = store().await;
  let err = s.load_all("x'; DROP TABLE documents; --").await.unwrap_err();
  assert!(matches!(err, Error::InvalidPath(_)));
}

// ─── Backfill ────────────────────────────────────────────────────────────────

async fn seed_legacy(s: &SqliteStore) {
  let now = Utc::now().to_rfc3339();
  let docs = [
    ("low", json!({"name": "Bakery", "business_type": "food", "coherence_index": 0.5})),
    ("high", json!({"name": "Forge", "business_type": "metal", "coherence_index": 0.85,
                    "success_rate": 0.9})),
    ("bare", json!({"name": "Kiosk", "business_type": "food"})),
  ];
  for (id, mut body) in docs {
    body["profile_id"] = json!(id);
    body["location"] = json!({"lat": 1.0, "lng": 2.0, "radius_m": 10.0});
    body["created_at"] = json!(now);
    body["updated_at"] = json!(now);
    s.insert_document(TARGET_COLLECTION, Document { id: id.into(), body })
      .await
      .unwrap();
  }
}

async fn doc(s: &SqliteStore, id: &str) -> Value {
  s.load_all(TARGET_COLLECTION)
    .await
    .unwrap()
    .into_iter()
    .find(|d| d.id == id)
    .map(|d| d.body)
    .unwrap()
}

#[tokio::test]
async fn backfill_adds_blocks_and_clamps_coherence() {
  let s = store().await;
  seed_legacy(&s).await;

  let report = backfill::run_up(&s, &BackfillOptions::default()).await.unwrap();
  assert_eq!(report.total, 3);
  assert_eq!(report.transformed, 3);
  assert_eq!(report.skipped, 0);
  assert_eq!(report.failed, 0);
  assert_eq!(report.backed_up, 3);
  assert!(report.validation.passed());

  let low = doc(&s, "low").await;
  assert_eq!(low["coherence_index"], json!(0.7));
  for field in backfill::ADDED_FIELDS {
    assert!(!low[field].is_null(), "missing {field}");
  }
  assert_eq!(low["reop_data"]["coherence_potential"], json!(0.7));
  assert_eq!(low["neo_findings"]["status"], json!("pending"));
  assert_eq!(low["migration_version"], json!(2));

  assert_eq!(doc(&s, "high").await["coherence_index"], json!(0.85));
  assert_eq!(doc(&s, "high").await["operational_experience"]["success_rate"], json!(0.9));
  assert_eq!(doc(&s, "bare").await["coherence_index"], json!(0.7));

  let backup = s.load_all(&report.backup_collection).await.unwrap();
  assert_eq!(backup.len(), 3);
  assert!(backup.iter().all(|d| d.body.get("reop_data").is_none()));

  assert_eq!(count_indexes(&s, "doc_target_profiles__").await, INDEXES.len() as i64);

  // Backfilled documents read back as typed profiles. They have no owner
  // yet, so only an unrestricted caller sees them.
  let system = OperatorContext::system();
  let typed = s.get_target_profile(&system, "high").await.unwrap().unwrap();
  assert!(typed.reop_data.is_some());
  assert_eq!(s.find_by_coherence_threshold(&system, 0.7).await.unwrap().len(), 3);
  let by_success = s.find_by_success_rate_threshold(&system, 0.8).await.unwrap();
  assert_eq!(by_success.len(), 1);
  assert_eq!(by_success[0].profile_id, "high");

  assert!(s.get_target_profile(&op("op-1"), "high").await.unwrap().is_none());
  assert!(s.find_by_coherence_threshold(&op("op-1"), 0.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn backfilled_profile_is_adopted_only_by_system() {
  let s = store().await;
  seed_legacy(&s).await;
  let mut fields = serde_json::Map::new();
  fields.insert("operator_id".into(), json!("op-2"));
  s.set_fields(TARGET_COLLECTION, "high", fields).await.unwrap();
  backfill::run_up(&s, &BackfillOptions::default()).await.unwrap();

  let system = OperatorContext::system();
  let low = s.get_target_profile(&system, "low").await.unwrap().unwrap();
  let err = s.save_target_profile(&op("op-1"), low.clone()).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
  s.save_target_profile(&system, low).await.unwrap();
  assert!(s.get_target_profile(&op("op-1"), "low").await.unwrap().is_none());

  // The integration block names the owner of a system save.
  let high = s.get_target_profile(&system, "high").await.unwrap().unwrap();
  assert_eq!(high.reop_integration.as_ref().unwrap().operator_id.as_deref(), Some("op-2"));
  s.save_target_profile(&system, high).await.unwrap();
  assert!(s.get_target_profile(&op("op-2"), "high").await.unwrap().is_some());
  let mine = s.find_by_coherence_threshold(&op("op-2"), 0.0).await.unwrap();
  assert_eq!(mine.len(), 1);
  assert_eq!(mine[0].profile_id, "high");
}

#[tokio::test]
async fn document_without_location_fails_consistency_but_reads_continue() {
  let s = store().await;
  seed_legacy(&s).await;
  s.insert_document(
    TARGET_COLLECTION,
    Document {
      id:   "old".into(),
      body: json!({"profile_id": "old", "name": "Old", "business_type": "x",
                   "coherence_index": 0.5}),
    },
  )
  .await
  .unwrap();

  let err = backfill::run_up(&s, &BackfillOptions::default()).await.unwrap_err();
  let outcome = match err {
    BackfillError::Validation(outcome) => outcome,
    other => panic!("expected validation failure, got {other}"),
  };
  assert_eq!(outcome.missing_fields, 1);
  assert!(!doc(&s, "old").await["created_at"].is_null());

  // The undecodable document is skipped, not fatal.
  let found = s
    .find_by_coherence_threshold(&OperatorContext::system(), 0.0)
    .await
    .unwrap();
  assert_eq!(found.len(), 3);
  assert!(found.iter().all(|p| p.profile_id != "old"));
}

#[tokio::test]
async fn coherence_above_one_fails_consistency() {
  let s = store().await;
  seed_legacy(&s).await;
  let mut fields = serde_json::Map::new();
  fields.insert("coherence_index".into(), json!(1.4));
  s.set_fields(TARGET_COLLECTION, "high", fields).await.unwrap();

  let err = backfill::run_up(&s, &BackfillOptions::default()).await.unwrap_err();
  let outcome = match err {
    BackfillError::Validation(outcome) => outcome,
    other => panic!("expected validation failure, got {other}"),
  };
  assert_eq!(outcome.out_of_range, 1);
  assert_eq!(outcome.missing_fields, 0);
  assert_eq!(outcome.below_threshold, 0);
}

#[tokio::test]
async fn index_failure_writes_failed_audit() {
  let s = store().await;
  seed_legacy(&s).await;
  exec(&s, "CREATE TABLE doc_target_profiles__integration_status (x)")
    .await
    .unwrap();

  let err = backfill::run_up(&s, &BackfillOptions::default()).await.unwrap_err();
  assert!(matches!(err, BackfillError::Store(_)), "got {err}");

  let audits = s.load_all(backfill::AUDIT_COLLECTION).await.unwrap();
  assert_eq!(audits.len(), 1);
  assert_eq!(audits[0].body["status"], json!("failed"));
  assert!(audits[0].body["backup_collection"].is_string());
}

#[tokio::test]
async fn backfill_second_run_skips_everything() {
  let s = store().await;
  seed_legacy(&s).await;
  let opts = BackfillOptions::default();

  let first = backfill::run_up(&s, &opts).await.unwrap();
  let high_before = doc(&s, "high").await;

  let second = backfill::run_up(&s, &opts).await.unwrap();
  assert_eq!(second.skipped, second.total);
  assert_eq!(second.transformed, 0);
  assert_ne!(first.backup_collection, second.backup_collection);
  assert_eq!(doc(&s, "high").await, high_before);

  let audits = s.load_all(backfill::AUDIT_COLLECTION).await.unwrap();
  assert_eq!(audits.len(), 2);
  assert!(audits.iter().all(|a| a.body["status"] == json!("completed")));
}

#[tokio::test]
async fn malformed_document_is_counted_and_fails_validation() {
  let s = store().await;
  seed_legacy(&s).await;
  s.insert_document(
    TARGET_COLLECTION,
    Document { id: "bad".into(), body: json!({"coherence_index": "high"}) },
  )
  .await
  .unwrap();

  let err = backfill::run_up(&s, &BackfillOptions::default()).await.unwrap_err();
  let outcome = match err {
    BackfillError::Validation(outcome) => outcome,
    other => panic!("expected validation failure, got {other}"),
  };
  assert_eq!(outcome.missing_fields, 1);

  // The good documents were still written.
  assert!(!doc(&s, "low").await["reop_data"].is_null());

  let audits = s.load_all(backfill::AUDIT_COLLECTION).await.unwrap();
  assert_eq!(audits.len(), 1);
  assert_eq!(audits[0].body["status"], json!("failed"));
  assert_eq!(audits[0].body["failed"], json!(1));
}

#[tokio::test]
async fn rollback_unsets_fields_and_tolerates_missing_indexes() {
  let s = store().await;
  seed_legacy(&s).await;
  let opts = BackfillOptions::default();
  backfill::run_up(&s, &opts).await.unwrap();

  let report = backfill::run_down(&s, &opts).await.unwrap();
  assert_eq!(report.documents_updated, 3);
  assert_eq!(report.indexes_dropped, INDEXES.len());
  assert!(report.index_errors.is_empty());
  assert_eq!(count_indexes(&s, "doc_target_profiles__").await, 0);

  for id in ["low", "high", "bare"] {
    let body = doc(&s, id).await;
    for field in backfill::ADDED_FIELDS {
      assert!(body.get(field).is_none(), "{id} still has {field}");
    }
  }
  // Not restorative: the clamped value stays.
  assert_eq!(doc(&s, "low").await["coherence_index"], json!(0.7));

  let again = backfill::run_down(&s, &opts).await.unwrap();
  assert_eq!(again.documents_updated, 0);
  assert_eq!(again.indexes_dropped, 0);
  assert_eq!(again.index_errors.len(), INDEXES.len());
}

// ─── Target profiles ─────────────────────────────────────────────────────────

#[tokio::test]
async fn coherence_gate_boundary() {
  let s = store().await;
  let ctx = op("op-1");

  let err = s.save_target_profile(&ctx, profile("Low", 0.69)).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Invalid);
  assert!(err.violations().unwrap().has("coherence_index"));
  assert!(s.find_by_coherence_threshold(&ctx, 0.0).await.unwrap().is_empty());

  let saved = s.save_target_profile(&ctx, profile("Ok", 0.70)).await.unwrap();
  assert!(saved.profile_id.starts_with("tp_"));
}

#[tokio::test]
async fn save_and_get_profile() {
  let s = store().await;
  let saved = s
    .save_target_profile(&op("op-1"), profile("Cafe", 0.8))
    .await
    .unwrap();

  let fetched = s
    .get_target_profile(&op("op-1"), &saved.profile_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(fetched, saved);
  assert!(s.get_target_profile(&op("op-1"), "tp_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn profiles_sorted_by_coherence_descending() {
  let s = store().await;
  let ctx = op("op-1");
  for (name, ci) in [("a", 0.75), ("b", 0.95), ("c", 0.85)] {
    s.save_target_profile(&ctx, profile(name, ci)).await.unwrap();
  }

  let found = s.find_by_coherence_threshold(&ctx, 0.8).await.unwrap();
  let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, vec!["b", "c"]);
}

#[tokio::test]
async fn profiling_history_is_append_only() {
  let s = store().await;
  let ctx = op("op-1");
  let saved = s.save_target_profile(&ctx, profile("Cafe", 0.8)).await.unwrap();

  let session = ProfilingSession {
    session_id:   String::new(),
    session_type: SessionType::Initial,
    score_before: 0.4,
    score_after:  0.6,
    notes:        String::new(),
    recorded_at:  Utc::now(),
  };
  let updated = s
    .append_profiling_session(&ctx, &saved.profile_id, session)
    .await
    .unwrap();
  assert_eq!(updated.profiling_history.len(), 1);
  assert!(updated.profiling_history[0].session_id.starts_with("ps_"));
  assert_eq!(updated.created_at, saved.created_at);

  let mut rewritten = updated.clone();
  rewritten.profiling_history.clear();
  let err = s.save_target_profile(&ctx, rewritten).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Conflict);
}

#[tokio::test]
async fn profile_of_another_operator_cannot_be_overwritten() {
  let s = store().await;
  let saved = s
    .save_target_profile(&op("op-1"), profile("Cafe", 0.8))
    .await
    .unwrap();

  let err = s.save_target_profile(&op("op-2"), saved.clone()).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);

  s.save_target_profile(&OperatorContext::system(), saved).await.unwrap();
}

#[tokio::test]
async fn profile_reads_are_scoped_to_the_owner() {
  let s = store().await;
  let saved = s
    .save_target_profile(&op("op-1"), profile("Cafe", 0.8))
    .await
    .unwrap();
  let id = saved.profile_id.as_str();

  assert!(s.get_target_profile(&op("op-2"), id).await.unwrap().is_none());
  assert!(s.find_by_coherence_threshold(&op("op-2"), 0.0).await.unwrap().is_empty());
  assert!(s.find_by_success_rate_threshold(&op("op-2"), 0.0).await.unwrap().is_empty());
  let err = s
    .append_profiling_session(&op("op-2"), id, ProfilingSession {
      session_id:   String::new(),
      session_type: SessionType::FollowUp,
      score_before: 0.5,
      score_after:  0.6,
      notes:        String::new(),
      recorded_at:  Utc::now(),
    })
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);

  assert!(s.get_target_profile(&op("op-1"), id).await.unwrap().is_some());
  assert!(s.get_target_profile(&OperatorContext::system(), id).await.unwrap().is_some());
  assert_eq!(s.find_by_coherence_threshold(&op("op-1"), 0.0).await.unwrap().len(), 1);

  // Without policies every profile is readable.
  s.migrate_down(5).await.unwrap();
  assert!(s.get_target_profile(&op("op-2"), id).await.unwrap().is_some());
}

// ─── Harmonic targets ────────────────────────────────────────────────────────

#[tokio::test]
async fn active_manifestations_sorted_by_resonance() {
  let s = store().await;
  let ctx = op("op-1");
  for (name, resonance, status) in [
    ("quiet", 0.3, ManifestationStatus::Active),
    ("loud", 0.9, ManifestationStatus::Active),
    ("idle", 0.99, ManifestationStatus::Pending),
  ] {
    let now = Utc::now();
    let target = HarmonicTarget {
      target_id:                String::new(),
      name:                     name.into(),
      business_type:            "studio".into(),
      location:                 location(),
      coherence_index:          0.8,
      harmonic_resonance_score: resonance,
      manifestation_status:     status,
      operator_id:              None,
      created_at:               now,
      updated_at:               now,
    };
    let saved = s.save_harmonic_target(&ctx, target).await.unwrap();
    assert_eq!(saved.operator_id.as_deref(), Some("op-1"));
  }

  let active = s.find_active_manifestations().await.unwrap();
  let names: Vec<&str> = active.iter().map(|t| t.name.as_str()).collect();
  assert_eq!(names, vec!["loud", "quiet"]);
}

// ─── Commands ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_are_visible_to_their_operator_only() {
  let s = store().await;
  let cmd = s
    .create_command(&op("op-a"), NewCommand::new(CommandType::PureCollapse, 0.9))
    .await
    .unwrap();
  assert!(cmd.command_id.starts_with("cmd_"));
  assert_eq!(cmd.status, CommandStatus::Pending);

  assert!(s.get_command(&op("op-a"), &cmd.command_id).await.unwrap().is_some());
  assert!(s.get_command(&op("op-b"), &cmd.command_id).await.unwrap().is_none());
  assert!(s.find_by_operator(&op("op-b"), "op-a").await.unwrap().is_empty());

  let system = OperatorContext::system();
  assert_eq!(s.find_by_operator(&system, "op-a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn without_policies_rows_are_unrestricted() {
  let s = store().await;
  let cmd = s
    .create_command(&op("op-a"), NewCommand::new(CommandType::PureCollapse, 0.9))
    .await
    .unwrap();

  s.migrate_down(5).await.unwrap();
  assert!(s.get_command(&op("op-b"), &cmd.command_id).await.unwrap().is_some());
}

#[tokio::test]
async fn find_by_operator_newest_first() {
  let s = store().await;
  let ctx = op("op-a");
  let first = s
    .create_command(&ctx, NewCommand::new(CommandType::HarmonicAlignment, 0.8))
    .await
    .unwrap();
  let second = s
    .create_command(&ctx, NewCommand::new(CommandType::FieldStabilization, 0.8))
    .await
    .unwrap();

  let found = s.find_by_operator(&ctx, "op-a").await.unwrap();
  let ids: Vec<&str> = found.iter().map(|c| c.command_id.as_str()).collect();
  assert_eq!(ids, vec![second.command_id.as_str(), first.command_id.as_str()]);
}

#[tokio::test]
async fn command_below_gate_is_rejected() {
  let s = store().await;
  let err = s
    .create_command(&op("op-a"), NewCommand::new(CommandType::PureCollapse, 0.69))
    .await
    .unwrap_err();
  assert!(err.violations().unwrap().has("coherence_index"));
}

#[tokio::test]
async fn duplicate_command_id_conflicts() {
  let s = store().await;
  let ctx = op("op-a");
  let mut input = NewCommand::new(CommandType::PureCollapse, 0.9);
  input.command_id = Some("cmd_fixed".into());
  s.create_command(&ctx, input.clone()).await.unwrap();

  let err = s.create_command(&ctx, input).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Conflict);
}

#[tokio::test]
async fn command_target_must_be_visible() {
  let s = store().await;
  let mine = s
    .save_target_profile(&op("op-a"), profile("Mine", 0.8))
    .await
    .unwrap();

  let mut input = NewCommand::new(CommandType::CoherenceRestoration, 0.8);
  input.target_profile_id = Some(mine.profile_id.clone());
  let cmd = s.create_command(&op("op-a"), input.clone()).await.unwrap();
  assert_eq!(cmd.target_profile_id.as_deref(), Some(mine.profile_id.as_str()));

  let err = s.create_command(&op("op-b"), input).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn status_transitions_follow_the_lifecycle() {
  let s = store().await;
  let ctx = op("op-a");
  let cmd = s
    .create_command(&ctx, NewCommand::new(CommandType::PureCollapse, 0.9))
    .await
    .unwrap();
  let id = cmd.command_id.as_str();

  for to in [
    CommandStatus::Processing,
    CommandStatus::Executing,
    CommandStatus::Completed,
  ] {
    let moved = s.transition_command(&ctx, id, to).await.unwrap();
    assert_eq!(moved.status, to);
  }
  let stored = s.get_command(&ctx, id).await.unwrap().unwrap();
  assert_eq!(stored.status, CommandStatus::Completed);

  let err = s
    .transition_command(&ctx, id, CommandStatus::Failed)
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::Conflict);

  let err = s
    .transition_command(&op("op-b"), id, CommandStatus::Cancelled)
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
}

// ─── Executions and documentation ────────────────────────────────────────────

#[tokio::test]
async fn executions_record_duration_and_owner() {
  let s = store().await;
  let ctx = op("op-a");
  let cmd = s
    .create_command(&ctx, NewCommand::new(CommandType::FrequencyCalibration, 0.8))
    .await
    .unwrap();

  let mut input = NewExecution::new(&cmd.command_id, ExecutionStatus::Succeeded);
  input.ended_at = Some(input.started_at + chrono::Duration::milliseconds(1500));
  input.coherence_delta = Some(0.05);
  input.coherence_maintained = true;
  let log = s.record_execution(&ctx, input).await.unwrap();
  assert_eq!(log.duration_ms, Some(1500));
  assert_eq!(log.operator_id, "op-a");

  s.record_execution(&ctx, NewExecution::new(&cmd.command_id, ExecutionStatus::Started))
    .await
    .unwrap();

  let logs = s.executions_for(&ctx, &cmd.command_id).await.unwrap();
  assert_eq!(logs.len(), 2);
  assert_eq!(logs[0], log);
  assert!(s.executions_for(&op("op-b"), &cmd.command_id).await.unwrap().is_empty());

  let err = s
    .record_execution(
      &op("op-b"),
      NewExecution::new(&cmd.command_id, ExecutionStatus::Started),
    )
    .await
    .unwrap_err();
  assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn execution_ending_before_start_is_invalid() {
  let s = store().await;
  let ctx = op("op-a");
  let cmd = s
    .create_command(&ctx, NewCommand::new(CommandType::PureCollapse, 0.8))
    .await
    .unwrap();

  let mut input = NewExecution::new(&cmd.command_id, ExecutionStatus::Failed);
  input.ended_at = Some(input.started_at - chrono::Duration::seconds(1));
  let err = s.record_execution(&ctx, input).await.unwrap_err();
  assert!(err.violations().unwrap().has("ended_at"));
}

#[tokio::test]
async fn documentation_attaches_to_visible_commands() {
  let s = store().await;
  let ctx = op("op-a");
  let cmd = s
    .create_command(&ctx, NewCommand::new(CommandType::BiochemicalRebalance, 0.8))
    .await
    .unwrap();

  let doc = s
    .attach_documentation(
      &ctx,
      NewDocumentation {
        command_id: cmd.command_id.clone(),
        title:      "Field notes".into(),
        body:       "stable".into(),
      },
    )
    .await
    .unwrap();
  assert!(doc.document_id.starts_with("doc_"));

  let docs = s.documentation_for(&ctx, &cmd.command_id).await.unwrap();
  assert_eq!(docs, vec![doc]);
  assert!(s.documentation_for(&op("op-b"), &cmd.command_id).await.unwrap().is_empty());
}

// ─── Telemetry ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn harmonic_ids_are_unique() {
  let s = store().await;
  let log = HarmonicFrequencyLog {
    harmonic_id:  "hf_1".into(),
    command_id:   None,
    frequency_hz: 7.83,
    amplitude:    0.4,
    recorded_at:  Utc::now(),
  };
  s.record_harmonic_frequency(log.clone()).await.unwrap();
  let err = s.record_harmonic_frequency(log).await.unwrap_err();
  assert_eq!(err.class(), ErrorClass::Conflict);
}

#[tokio::test]
async fn coherence_samples_oldest_first() {
  let s = store().await;
  let start = Utc::now();
  for (i, ci) in [0.5, 0.9].into_iter().enumerate() {
    s.record_coherence_sample(CoherenceSample {
      log_id:          String::new(),
      profile_id:      Some("tp_1".into()),
      coherence_index: ci,
      recorded_at:     start + chrono::Duration::seconds(i as i64),
    })
    .await
    .unwrap();
  }

  let samples = s.coherence_samples("tp_1").await.unwrap();
  let values: Vec<f64> = samples.iter().map(|x| x.coherence_index).collect();
  assert_eq!(values, vec![0.5, 0.9]);
  assert!(samples[0].log_id.starts_with("cil_"));
}

#[tokio::test]
async fn biochemical_marker_gets_an_id_and_a_row() {
  let s = store().await;
  let saved = s
    .record_biochemical_marker(BiochemicalMarker {
      tracking_id: String::new(),
      profile_id:  Some("tp_1".into()),
      marker:      "cortisol".into(),
      value:       12.5,
      unit:        "nmol/L".into(),
      recorded_at: Utc::now(),
    })
    .await
    .unwrap();
  assert!(saved.tracking_id.starts_with("bt_"));

  let id = saved.tracking_id.clone();
  let (marker, value): (String, f64) = s
    .run(move |conn| {
      Ok(conn.query_row(
        "SELECT marker, value FROM biochemical_tracking WHERE tracking_id = ?1",
        [id],
        |r| Ok((r.get(0)?, r.get(1)?)),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(marker, "cortisol");
  assert_eq!(value, 12.5);
}
