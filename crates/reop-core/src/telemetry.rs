//! System-inserted telemetry rows. These tables carry an unconditional
//! insert policy; no operator context is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::{ValidationErrors, Validator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicFrequencyLog {
  #[serde(default)]
  pub harmonic_id:  String,
  #[serde(default)]
  pub command_id:   Option<String>,
  pub frequency_hz: f64,
  pub amplitude:    f64,
  pub recorded_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceSample {
  #[serde(default)]
  pub log_id:          String,
  #[serde(default)]
  pub profile_id:      Option<String>,
  pub coherence_index: f64,
  pub recorded_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiochemicalMarker {
  #[serde(default)]
  pub tracking_id: String,
  #[serde(default)]
  pub profile_id:  Option<String>,
  pub marker:      String,
  pub value:       f64,
  pub unit:        String,
  pub recorded_at: DateTime<Utc>,
}

impl HarmonicFrequencyLog {
  pub fn validate(&self) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.non_negative("frequency_hz", self.frequency_hz);
    v.non_negative("amplitude", self.amplitude);
    v.finish()
  }
}

impl CoherenceSample {
  /// Only the range is checked. Readings below the coherence gate are valid
  /// samples.
  pub fn validate(&self) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.unit("coherence_index", self.coherence_index);
    v.finish()
  }
}

impl BiochemicalMarker {
  pub fn validate(&self) -> Result<(), ValidationErrors> {
    let mut v = Validator::new();
    v.required("marker", &self.marker);
    v.required("unit", &self.unit);
    if !self.value.is_finite() {
      v.invalid("value", "must be a finite number");
    }
    v.finish()
  }
}
