//! Harmonic targets, the second document collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  id::ensure_id,
  target::{Location, ManifestationStatus},
  thresholds::Thresholds,
  validate::{ValidationErrors, Validator},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicTarget {
  #[serde(default)]
  pub target_id:                String,
  pub name:                     String,
  pub business_type:            String,
  pub location:                 Location,
  pub coherence_index:          f64,
  pub harmonic_resonance_score: f64,
  #[serde(default)]
  pub manifestation_status:     ManifestationStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub operator_id:              Option<String>,
  pub created_at:               DateTime<Utc>,
  pub updated_at:               DateTime<Utc>,
}

impl HarmonicTarget {
  pub fn ensure_ids(&mut self) { ensure_id(&mut self.target_id, "ht"); }

  pub fn validate(&self, t: &Thresholds) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("target_id", &self.target_id);
    v.required("name", &self.name);
    v.required("business_type", &self.business_type);
    v.nested("location", |v| self.location.check(v));
    v.gate("coherence_index", self.coherence_index, t.min_coherence);
    v.unit("harmonic_resonance_score", self.harmonic_resonance_score);
    v.finish()
  }

  pub fn is_active(&self) -> bool {
    self.manifestation_status == ManifestationStatus::Active
  }
}
