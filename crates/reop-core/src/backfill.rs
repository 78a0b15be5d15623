//! One-time backfill of target-profile documents to the analysis-block
//! shape.
//!
//! `run_up` walks the collection once:
//!
//! 1. snapshot the collection into a uniquely named backup collection;
//! 2. load every document;
//! 3. transform each document that lacks `reop_data`, one at a time;
//! 4. build the secondary indexes on the new nested fields;
//! 5. count documents still missing a required field or below the
//!    coherence threshold, failing the job if any are found;
//! 6. write one audit record to the `migrations` collection.
//!
//! Per-document failures are logged and counted; they do not stop the batch.
//! A job-level failure (index creation, consistency pass) still writes a
//! `failed` audit record before the error is returned.
//! `run_down` strips the added fields and drops the indexes. It does not
//! restore anything from the backup collection.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  document::{Document, DocumentFilter, DocumentStore, IndexSpec, is_valid_path},
  id::synthesize_id,
  target::{
    AiAnalysis, FindingsStatus, ManifestationStatus, NeoFindings,
    OperationalExperience, ReopData, ReopIntegration,
  },
  thresholds::Thresholds,
};

pub const SOURCE_COLLECTION: &str = "target_profiles";
pub const AUDIT_COLLECTION: &str = "migrations";
pub const MIGRATION_NAME: &str = "target_profile_analysis_blocks";
pub const MIGRATION_VERSION: u32 = 2;

/// Presence of this field marks a document as already migrated.
const GUARD_FIELD: &str = "reop_data";

/// Every top-level field the backfill adds.
pub const ADDED_FIELDS: [&str; 7] = [
  "reop_data",
  "neo_findings",
  "operational_experience",
  "ai_analysis",
  "reop_integration",
  "migration_version",
  "migration_timestamp",
];

/// Fields every document must carry after a successful run: the added
/// blocks plus everything a typed profile read needs.
pub const REQUIRED_FIELDS: [&str; 11] = [
  "name",
  "business_type",
  "location",
  "created_at",
  "updated_at",
  "reop_data",
  "neo_findings",
  "operational_experience",
  "ai_analysis",
  "reop_integration",
  "migration_version",
];

pub const INDEXES: [IndexSpec; 7] = [
  IndexSpec { name: "reop_coherence_potential", path: "reop_data.coherence_potential" },
  IndexSpec { name: "reop_resonance", path: "reop_data.harmonic_resonance_score" },
  IndexSpec { name: "neo_findings_status", path: "neo_findings.status" },
  IndexSpec { name: "neo_findings_ci", path: "neo_findings.verification_ci" },
  IndexSpec { name: "ai_profiling_success", path: "ai_analysis.profiling_success_rate" },
  IndexSpec { name: "operational_success", path: "operational_experience.success_rate" },
  IndexSpec { name: "integration_status", path: "reop_integration.status" },
];

// Defaults for source fields a legacy document may lack.
const DEFAULT_NAME: &str = "unknown";
const DEFAULT_BUSINESS_TYPE: &str = "unclassified";
const DEFAULT_RESONANCE: f64 = 0.5;
const DEFAULT_FREQUENCY_HZ: f64 = 7.83;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_RISK: f64 = 0.5;

// ─── Options and reports ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackfillOptions {
  pub collection: String,
  pub thresholds: Thresholds,
}

impl Default for BackfillOptions {
  fn default() -> Self {
    Self {
      collection: SOURCE_COLLECTION.to_owned(),
      thresholds: Thresholds::default(),
    }
  }
}

/// Result of the post-transform consistency pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
  pub missing_fields:  u64,
  pub below_threshold: u64,
  /// Coherence values above 1, which no typed save would accept.
  #[serde(default)]
  pub out_of_range:    u64,
}

impl ValidationOutcome {
  pub fn passed(&self) -> bool {
    self.missing_fields == 0 && self.below_threshold == 0 && self.out_of_range == 0
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackfillReport {
  pub backup_collection: String,
  pub backed_up:         u64,
  pub total:             u64,
  pub transformed:       u64,
  pub skipped:           u64,
  pub failed:            u64,
  pub indexes_created:   usize,
  pub validation:        ValidationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
  pub documents_updated: u64,
  pub indexes_dropped:   usize,
  pub index_errors:      Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Up,
  Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
  Completed,
  Failed,
}

/// One record per run, written to [`AUDIT_COLLECTION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
  pub migration:   String,
  pub version:     u32,
  pub direction:   Direction,
  pub status:      AuditStatus,
  pub collection:  String,
  pub executed_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub backup_collection: Option<String>,
  #[serde(default)]
  pub transformed: u64,
  #[serde(default)]
  pub skipped:     u64,
  #[serde(default)]
  pub failed:      u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub validation:  Option<ValidationOutcome>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub documents_updated: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub indexes_dropped:   Option<usize>,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackfillError {
  #[error("invalid collection name: {0:?}")]
  InvalidCollection(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(
    "post-backfill validation failed: {} document(s) missing required fields, {} below the coherence threshold, {} out of range",
    .0.missing_fields,
    .0.below_threshold,
    .0.out_of_range
  )]
  Validation(ValidationOutcome),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Why a single document could not be transformed.
#[derive(Debug, Error)]
pub enum TransformError {
  #[error("document body is not an object")]
  NotAnObject,

  #[error("field {field} is not a {expected}")]
  Malformed {
    field:    &'static str,
    expected: &'static str,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

fn store_err<E>(e: E) -> BackfillError
where
  E: std::error::Error + Send + Sync + 'static,
{
  BackfillError::Store(Box::new(e))
}

// ─── Transform ───────────────────────────────────────────────────────────────

fn read_f64(
  obj: &Map<String, Value>,
  field: &'static str,
) -> Result<Option<f64>, TransformError> {
  match obj.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(v) => v
      .as_f64()
      .map(Some)
      .ok_or(TransformError::Malformed { field, expected: "number" }),
  }
}

fn read_str<'a>(
  obj: &'a Map<String, Value>,
  field: &'static str,
) -> Result<Option<&'a str>, TransformError> {
  match obj.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(v) => v
      .as_str()
      .map(Some)
      .ok_or(TransformError::Malformed { field, expected: "string" }),
  }
}

fn read_u32(
  obj: &Map<String, Value>,
  field: &'static str,
) -> Result<Option<u32>, TransformError> {
  match obj.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(v) => v
      .as_u64()
      .and_then(|n| u32::try_from(n).ok())
      .map(Some)
      .ok_or(TransformError::Malformed { field, expected: "count" }),
  }
}

fn has_field(body: &Value, field: &str) -> bool {
  body.get(field).is_some_and(|v| !v.is_null())
}

/// Build the fields to set on one legacy document.
///
/// The coherence index is raised to the threshold when below it and left
/// untouched otherwise; `coherence_index` only appears in the result when
/// its value changes. A missing `name`, `business_type`, `created_at` or
/// `updated_at` is filled in; a missing `location` is left for the
/// consistency pass to report.
pub fn transform(
  body: &Value,
  t: &Thresholds,
  now: DateTime<Utc>,
) -> Result<Map<String, Value>, TransformError> {
  let obj = body.as_object().ok_or(TransformError::NotAnObject)?;

  let stored_name = read_str(obj, "name")?;
  let stored_created = read_str(obj, "created_at")?;
  let stored_updated = read_str(obj, "updated_at")?;
  let stored_type = read_str(obj, "business_type")?;
  let name = stored_name.unwrap_or(DEFAULT_NAME);
  let business_type = stored_type.unwrap_or(DEFAULT_BUSINESS_TYPE);
  let original_ci = read_f64(obj, "coherence_index")?;
  let coherence = match original_ci {
    Some(ci) if ci >= t.min_coherence => ci,
    _ => t.min_coherence,
  };

  let resonance = read_f64(obj, "harmonic_resonance_score")?
    .unwrap_or(DEFAULT_RESONANCE)
    .clamp(0.0, 1.0);
  let frequency_hz =
    read_f64(obj, "frequency_hz")?.unwrap_or(DEFAULT_FREQUENCY_HZ).max(0.0);
  let confidence = read_f64(obj, "confidence_score")?
    .unwrap_or(DEFAULT_CONFIDENCE)
    .clamp(0.0, 1.0);
  let profiling_success = read_f64(obj, "profiling_success_rate")?
    .unwrap_or(0.0)
    .clamp(0.0, 1.0);
  let success_rate =
    read_f64(obj, "success_rate")?.unwrap_or(0.0).clamp(0.0, 1.0);
  let interactions = read_u32(obj, "interactions")?.unwrap_or(0);
  let notes = read_str(obj, "notes")?.unwrap_or_default();
  let operator_id = read_str(obj, "operator_id")?.map(str::to_owned);

  let reop_data = ReopData {
    coherence_potential: coherence.min(1.0),
    harmonic_resonance_score: resonance,
    frequency_hz,
    assessed_at: now,
  };
  let neo_findings = NeoFindings {
    findings_id:      synthesize_id("nf"),
    status:           FindingsStatus::Pending,
    verification_ci:  coherence,
    confidence_score: confidence,
    summary:          format!("baseline findings for {name} ({business_type})"),
    recorded_at:      now,
  };
  let ai_analysis = AiAnalysis {
    analysis_id:            synthesize_id("ai"),
    verification_ci:        coherence,
    profiling_success_rate: profiling_success,
    risk_score:             DEFAULT_RISK,
    summary:                format!("{business_type} profile awaiting analysis"),
    analyzed_at:            now,
  };
  let operational_experience = OperationalExperience {
    experience_id: synthesize_id("oe"),
    verification_ci: coherence,
    success_rate,
    interactions,
    notes: notes.to_owned(),
    recorded_at: now,
  };
  let reop_integration = ReopIntegration {
    status: ManifestationStatus::Pending,
    coherence_achieved: 0.0,
    operator_id,
    updated_at: now,
  };

  let mut fields = Map::new();
  if stored_name.is_none() {
    fields.insert("name".into(), Value::from(name));
  }
  if stored_type.is_none() {
    fields.insert("business_type".into(), Value::from(business_type));
  }
  if stored_created.is_none() {
    fields.insert("created_at".into(), serde_json::to_value(now)?);
  }
  if stored_updated.is_none() {
    fields.insert("updated_at".into(), serde_json::to_value(now)?);
  }
  if original_ci != Some(coherence) {
    fields.insert("coherence_index".into(), Value::from(coherence));
  }
  fields.insert("reop_data".into(), serde_json::to_value(reop_data)?);
  fields.insert("neo_findings".into(), serde_json::to_value(neo_findings)?);
  fields.insert(
    "operational_experience".into(),
    serde_json::to_value(operational_experience)?,
  );
  fields.insert("ai_analysis".into(), serde_json::to_value(ai_analysis)?);
  fields.insert(
    "reop_integration".into(),
    serde_json::to_value(reop_integration)?,
  );
  fields.insert("migration_version".into(), Value::from(MIGRATION_VERSION));
  fields.insert("migration_timestamp".into(), serde_json::to_value(now)?);
  Ok(fields)
}

// ─── Job ─────────────────────────────────────────────────────────────────────

fn check_collection(collection: &str) -> Result<(), BackfillError> {
  if is_valid_path(collection) && !collection.contains('.') {
    Ok(())
  } else {
    Err(BackfillError::InvalidCollection(collection.to_owned()))
  }
}

fn backup_name(collection: &str, at: DateTime<Utc>) -> String {
  let suffix = Uuid::new_v4().simple().to_string();
  format!("{collection}_backup_{}_{}", at.timestamp_millis(), &suffix[..8])
}

async fn write_audit<S: DocumentStore>(
  store: &S,
  record: &AuditRecord,
) -> Result<(), BackfillError> {
  let doc = Document {
    id:   synthesize_id("mig"),
    body: serde_json::to_value(record)?,
  };
  store.insert_document(AUDIT_COLLECTION, doc).await.map_err(store_err)
}

/// Count documents that violate the post-backfill invariants.
pub async fn validate_collection<S: DocumentStore>(
  store: &S,
  collection: &str,
  t: &Thresholds,
) -> Result<ValidationOutcome, BackfillError> {
  let missing = DocumentFilter::MissingAny(
    REQUIRED_FIELDS.iter().map(|f| (*f).to_owned()).collect(),
  );
  let below = DocumentFilter::Below {
    path:      "coherence_index".to_owned(),
    threshold: t.min_coherence,
  };
  let above = DocumentFilter::Above {
    path:      "coherence_index".to_owned(),
    threshold: 1.0,
  };

  Ok(ValidationOutcome {
    missing_fields:  store
      .count_matching(collection, &missing)
      .await
      .map_err(store_err)?,
    below_threshold: store
      .count_matching(collection, &below)
      .await
      .map_err(store_err)?,
    out_of_range:    store
      .count_matching(collection, &above)
      .await
      .map_err(store_err)?,
  })
}

/// Run the backfill. See the module documentation for the step order.
pub async fn run_up<S: DocumentStore>(
  store: &S,
  opts: &BackfillOptions,
) -> Result<BackfillReport, BackfillError> {
  let collection = opts.collection.as_str();
  check_collection(collection)?;
  let started = Utc::now();

  let backup_collection = backup_name(collection, started);
  let backed_up = store
    .copy_collection(collection, &backup_collection)
    .await
    .map_err(store_err)?;
  info!(collection, %backup_collection, backed_up, "collection snapshotted");

  let docs = store.load_all(collection).await.map_err(store_err)?;

  let (mut transformed, mut skipped, mut failed) = (0u64, 0u64, 0u64);
  for doc in &docs {
    if has_field(&doc.body, GUARD_FIELD) {
      skipped += 1;
      continue;
    }

    let mut fields = match transform(&doc.body, &opts.thresholds, Utc::now()) {
      Ok(fields) => fields,
      Err(e) => {
        warn!(doc_id = %doc.id, error = %e, "document transform failed");
        failed += 1;
        continue;
      }
    };

    if !has_field(&doc.body, "profile_id") {
      fields.insert("profile_id".into(), Value::from(doc.id.as_str()));
    }

    match store.set_fields(collection, &doc.id, fields).await {
      Ok(()) => {
        debug!(doc_id = %doc.id, "document transformed");
        transformed += 1;
      }
      Err(e) => {
        warn!(doc_id = %doc.id, error = %e, "document write failed");
        failed += 1;
      }
    }
  }
  info!(total = docs.len(), transformed, skipped, failed, "documents processed");

  let mut audit = AuditRecord {
    migration: MIGRATION_NAME.to_owned(),
    version: MIGRATION_VERSION,
    direction: Direction::Up,
    status: AuditStatus::Failed,
    collection: collection.to_owned(),
    executed_at: started,
    backup_collection: Some(backup_collection.clone()),
    transformed,
    skipped,
    failed,
    validation: None,
    documents_updated: None,
    indexes_dropped: None,
  };

  let indexed =
    try_join_all(INDEXES.iter().map(|spec| store.create_index(collection, spec)))
      .await;
  if let Err(e) = indexed {
    error!(collection, error = %e, "index creation failed");
    write_audit(store, &audit).await?;
    return Err(store_err(e));
  }

  let validation =
    validate_collection(store, collection, &opts.thresholds).await?;

  let report = BackfillReport {
    backup_collection,
    backed_up,
    total: docs.len() as u64,
    transformed,
    skipped,
    failed,
    indexes_created: INDEXES.len(),
    validation,
  };

  if validation.passed() {
    audit.status = AuditStatus::Completed;
  }
  audit.validation = Some(validation);
  write_audit(store, &audit).await?;

  if !validation.passed() {
    error!(
      missing_fields = validation.missing_fields,
      below_threshold = validation.below_threshold,
      out_of_range = validation.out_of_range,
      "backfill left the collection inconsistent"
    );
    return Err(BackfillError::Validation(validation));
  }

  Ok(report)
}

/// Strip the added fields from every document and drop the indexes.
///
/// Index drops are best-effort: a failure (usually "no such index") is
/// logged and reported, never fatal.
pub async fn run_down<S: DocumentStore>(
  store: &S,
  opts: &BackfillOptions,
) -> Result<RollbackReport, BackfillError> {
  let collection = opts.collection.as_str();
  check_collection(collection)?;
  let started = Utc::now();

  let documents_updated = store
    .unset_fields(collection, &ADDED_FIELDS)
    .await
    .map_err(store_err)?;

  let mut indexes_dropped = 0;
  let mut index_errors = Vec::new();
  for spec in &INDEXES {
    match store.drop_index(collection, spec.name).await {
      Ok(()) => indexes_dropped += 1,
      Err(e) => {
        warn!(index = spec.name, error = %e, "index drop failed, continuing");
        index_errors.push(format!("{}: {e}", spec.name));
      }
    }
  }

  let audit = AuditRecord {
    migration: MIGRATION_NAME.to_owned(),
    version: MIGRATION_VERSION,
    direction: Direction::Down,
    status: AuditStatus::Completed,
    collection: collection.to_owned(),
    executed_at: started,
    backup_collection: None,
    transformed: 0,
    skipped: 0,
    failed: 0,
    validation: None,
    documents_updated: Some(documents_updated),
    indexes_dropped: Some(indexes_dropped),
  };
  write_audit(store, &audit).await?;

  info!(collection, documents_updated, indexes_dropped, "backfill rolled back");
  Ok(RollbackReport { documents_updated, indexes_dropped, index_errors })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  use crate::target::TargetProfile;

  fn legacy(ci: Value) -> Value {
    json!({
      "profile_id": "tp_1",
      "name": "Corner Cafe",
      "business_type": "cafe",
      "location": { "lat": 10.0, "lng": 20.0, "radius_m": 100.0 },
      "coherence_index": ci,
      "success_rate": 0.6,
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-01T00:00:00Z"
    })
  }

  #[test]
  fn clamps_low_coherence_up_to_threshold() {
    let fields =
      transform(&legacy(json!(0.4)), &Thresholds::default(), Utc::now()).unwrap();
    assert_eq!(fields["coherence_index"], json!(0.7));
    assert_eq!(fields["neo_findings"]["verification_ci"], json!(0.7));
    assert_eq!(fields["migration_version"], json!(MIGRATION_VERSION));
    for f in ADDED_FIELDS {
      assert!(fields.contains_key(f), "missing {f}");
    }
  }

  #[test]
  fn leaves_acceptable_coherence_alone() {
    let fields =
      transform(&legacy(json!(0.85)), &Thresholds::default(), Utc::now()).unwrap();
    assert!(!fields.contains_key("coherence_index"));
    assert_eq!(fields["reop_data"]["coherence_potential"], json!(0.85));
    assert_eq!(fields["operational_experience"]["success_rate"], json!(0.6));
  }

  #[test]
  fn missing_source_fields_use_defaults() {
    let fields = transform(&json!({}), &Thresholds::default(), Utc::now()).unwrap();
    assert_eq!(fields["coherence_index"], json!(0.7));
    assert_eq!(fields["reop_data"]["harmonic_resonance_score"], json!(0.5));
    assert_eq!(fields["reop_data"]["frequency_hz"], json!(7.83));
    assert_eq!(fields["reop_integration"]["status"], json!("pending"));
    assert_eq!(fields["name"], json!("unknown"));
    assert_eq!(fields["business_type"], json!("unclassified"));
    assert_eq!(
      fields["neo_findings"]["summary"],
      json!("baseline findings for unknown (unclassified)")
    );
  }

  #[test]
  fn malformed_fields_fail_the_document() {
    let err =
      transform(&legacy(json!("high")), &Thresholds::default(), Utc::now())
        .unwrap_err();
    assert!(matches!(
      err,
      TransformError::Malformed { field: "coherence_index", .. }
    ));

    let err = transform(&json!([1, 2]), &Thresholds::default(), Utc::now())
      .unwrap_err();
    assert!(matches!(err, TransformError::NotAnObject));
  }

  #[test]
  fn transformed_document_is_a_valid_profile() {
    let mut body = legacy(json!(0.4));
    let fields = transform(&body, &Thresholds::default(), Utc::now()).unwrap();
    let obj = body.as_object_mut().unwrap();
    obj.extend(fields);

    let profile: TargetProfile = serde_json::from_value(body).unwrap();
    assert!(profile.validate(&Thresholds::default()).is_ok());
    assert_eq!(profile.migration_version, Some(MIGRATION_VERSION));
    assert!(!profile.is_ready_for_integration(&Thresholds::default()));
  }

  #[test]
  fn backup_names_are_unique_and_valid() {
    let now = Utc::now();
    let a = backup_name("target_profiles", now);
    let b = backup_name("target_profiles", now);
    assert_ne!(a, b);
    assert!(is_valid_path(&a));
    assert!(a.starts_with("target_profiles_backup_"));
  }
}
