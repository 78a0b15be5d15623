//! Business-rule thresholds and score weights.
//!
//! The values are configuration, not derived from any model. Both structs
//! deserialize with per-field defaults so a config file may override any
//! subset.

use serde::{Deserialize, Serialize};

/// Minimum coherence index for a record to be written at all.
pub const MIN_COHERENCE: f64 = 0.7;

/// Minimum profiling success rate for integration readiness.
pub const MIN_SUCCESS_RATE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
  pub min_coherence:    f64,
  pub min_success_rate: f64,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self { min_coherence: MIN_COHERENCE, min_success_rate: MIN_SUCCESS_RATE }
  }
}

/// Weights of the overall-score linear combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
  pub coherence_potential:      f64,
  pub profiling_success_rate:   f64,
  pub harmonic_resonance:       f64,
  pub operational_success_rate: f64,
}

impl Default for ScoreWeights {
  fn default() -> Self {
    Self {
      coherence_potential:      0.3,
      profiling_success_rate:   0.3,
      harmonic_resonance:       0.2,
      operational_success_rate: 0.2,
    }
  }
}
