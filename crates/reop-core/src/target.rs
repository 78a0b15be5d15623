//! Target profiles: the business entities tracked through analysis and
//! integration.
//!
//! A profile is stored as a single document. The nested analysis blocks are
//! optional: documents written before the backfill job do not carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  id::ensure_id,
  thresholds::{ScoreWeights, Thresholds},
  validate::{ValidationErrors, Validator},
};

// ─── Geography ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub lat:      f64,
  pub lng:      f64,
  /// Operating radius in metres.
  pub radius_m: f64,
}

impl Location {
  pub(crate) fn check(&self, v: &mut Validator) {
    v.range("lat", self.lat, -90.0, 90.0);
    v.range("lng", self.lng, -180.0, 180.0);
    if !(self.radius_m > 0.0) {
      v.invalid("radius_m", "must be positive");
    }
  }
}

// ─── Analysis blocks ─────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
  strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FindingsStatus {
  #[default]
  Pending,
  Verified,
  Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeoFindings {
  #[serde(default)]
  pub findings_id:      String,
  #[serde(default)]
  pub status:           FindingsStatus,
  pub verification_ci:  f64,
  pub confidence_score: f64,
  #[serde(default)]
  pub summary:          String,
  pub recorded_at:      DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
  #[serde(default)]
  pub analysis_id:            String,
  pub verification_ci:        f64,
  pub profiling_success_rate: f64,
  pub risk_score:             f64,
  #[serde(default)]
  pub summary:                String,
  pub analyzed_at:            DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalExperience {
  #[serde(default)]
  pub experience_id:   String,
  pub verification_ci: f64,
  pub success_rate:    f64,
  #[serde(default)]
  pub interactions:    u32,
  #[serde(default)]
  pub notes:           String,
  pub recorded_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReopData {
  pub coherence_potential:      f64,
  pub harmonic_resonance_score: f64,
  pub frequency_hz:             f64,
  pub assessed_at:              DateTime<Utc>,
}

/// Workflow state of the integration block.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
  strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManifestationStatus {
  #[default]
  Pending,
  Active,
  Completed,
  Failed,
  Suspended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReopIntegration {
  #[serde(default)]
  pub status:             ManifestationStatus,
  pub coherence_achieved: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operator_id:        Option<String>,
  pub updated_at:         DateTime<Utc>,
}

// ─── Profiling history ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
  Initial,
  FollowUp,
  Verification,
  Integration,
}

/// One profiling session. Once appended to a profile it is never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingSession {
  #[serde(default)]
  pub session_id:   String,
  pub session_type: SessionType,
  pub score_before: f64,
  pub score_after:  f64,
  #[serde(default)]
  pub notes:        String,
  pub recorded_at:  DateTime<Utc>,
}

// ─── TargetProfile ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
  #[serde(default)]
  pub profile_id:      String,
  pub name:            String,
  pub business_type:   String,
  pub location:        Location,
  /// Distance from the fixed reference point, in kilometres.
  #[serde(default)]
  pub distance_km:     f64,
  pub coherence_index: f64,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neo_findings:           Option<NeoFindings>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ai_analysis:            Option<AiAnalysis>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operational_experience: Option<OperationalExperience>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reop_data:              Option<ReopData>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reop_integration:       Option<ReopIntegration>,

  #[serde(default)]
  pub profiling_history: Vec<ProfilingSession>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub migration_version:   Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub migration_timestamp: Option<DateTime<Utc>>,

  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TargetProfile {
  /// A profile with no analysis blocks and an empty history.
  pub fn new(
    name: impl Into<String>,
    business_type: impl Into<String>,
    location: Location,
    coherence_index: f64,
  ) -> Self {
    let now = Utc::now();
    Self {
      profile_id: String::new(),
      name: name.into(),
      business_type: business_type.into(),
      location,
      distance_km: 0.0,
      coherence_index,
      neo_findings: None,
      ai_analysis: None,
      operational_experience: None,
      reop_data: None,
      reop_integration: None,
      profiling_history: Vec::new(),
      migration_version: None,
      migration_timestamp: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Synthesize every blank identifier: the profile's own and those of its
  /// nested blocks and history sessions.
  pub fn ensure_ids(&mut self) {
    ensure_id(&mut self.profile_id, "tp");
    if let Some(f) = &mut self.neo_findings {
      ensure_id(&mut f.findings_id, "nf");
    }
    if let Some(a) = &mut self.ai_analysis {
      ensure_id(&mut a.analysis_id, "ai");
    }
    if let Some(e) = &mut self.operational_experience {
      ensure_id(&mut e.experience_id, "oe");
    }
    for s in &mut self.profiling_history {
      ensure_id(&mut s.session_id, "ps");
    }
  }

  /// Check every field rule. Call after [`Self::ensure_ids`].
  pub fn validate(&self, t: &Thresholds) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("profile_id", &self.profile_id);
    v.required("name", &self.name);
    v.required("business_type", &self.business_type);
    v.nested("location", |v| self.location.check(v));
    v.non_negative("distance_km", self.distance_km);
    v.gate("coherence_index", self.coherence_index, t.min_coherence);

    if let Some(f) = &self.neo_findings {
      v.nested("neo_findings", |v| {
        v.gate("verification_ci", f.verification_ci, t.min_coherence);
        v.unit("confidence_score", f.confidence_score);
      });
    }
    if let Some(a) = &self.ai_analysis {
      v.nested("ai_analysis", |v| {
        v.gate("verification_ci", a.verification_ci, t.min_coherence);
        v.unit("profiling_success_rate", a.profiling_success_rate);
        v.unit("risk_score", a.risk_score);
      });
    }
    if let Some(e) = &self.operational_experience {
      v.nested("operational_experience", |v| {
        v.gate("verification_ci", e.verification_ci, t.min_coherence);
        v.unit("success_rate", e.success_rate);
      });
    }
    if let Some(d) = &self.reop_data {
      v.nested("reop_data", |v| {
        v.unit("coherence_potential", d.coherence_potential);
        v.unit("harmonic_resonance_score", d.harmonic_resonance_score);
        v.non_negative("frequency_hz", d.frequency_hz);
      });
    }
    if let Some(i) = &self.reop_integration {
      v.nested("reop_integration", |v| {
        v.unit("coherence_achieved", i.coherence_achieved);
      });
    }
    for (n, s) in self.profiling_history.iter().enumerate() {
      v.nested(&format!("profiling_history.{n}"), |v| {
        v.required("session_id", &s.session_id);
        v.unit("score_before", s.score_before);
        v.unit("score_after", s.score_after);
      });
    }
    v.finish()
  }

  /// Whether `next` keeps every session of `self` in place, in order.
  pub fn history_preserved_by(&self, next: &TargetProfile) -> bool {
    next.profiling_history.starts_with(&self.profiling_history)
  }

  /// Fixed weighted sum of four stored component scores. A missing block
  /// contributes 0.
  pub fn overall_score(&self, w: &ScoreWeights) -> f64 {
    let coherence_potential =
      self.reop_data.as_ref().map_or(0.0, |d| d.coherence_potential);
    let profiling_success =
      self.ai_analysis.as_ref().map_or(0.0, |a| a.profiling_success_rate);
    let resonance =
      self.reop_data.as_ref().map_or(0.0, |d| d.harmonic_resonance_score);
    let operational_success =
      self.operational_experience.as_ref().map_or(0.0, |e| e.success_rate);

    coherence_potential * w.coherence_potential
      + profiling_success * w.profiling_success_rate
      + resonance * w.harmonic_resonance
      + operational_success * w.operational_success_rate
  }

  /// All four readiness checks must hold; evaluated fresh on every call.
  pub fn is_ready_for_integration(&self, t: &Thresholds) -> bool {
    let ci_ok = self.coherence_index >= t.min_coherence;
    let potential_ok = self
      .reop_data
      .as_ref()
      .is_some_and(|d| d.coherence_potential >= t.min_coherence);
    let success_ok = self
      .ai_analysis
      .as_ref()
      .is_some_and(|a| a.profiling_success_rate >= t.min_success_rate);
    let verified = self
      .neo_findings
      .as_ref()
      .is_some_and(|f| f.status == FindingsStatus::Verified);

    ci_ok && potential_ok && success_ok && verified
  }
}
