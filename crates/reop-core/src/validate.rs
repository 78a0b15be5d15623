//! Typed validation results.
//!
//! Each entity exposes a `validate` method that collects every violated
//! constraint into a [`ValidationErrors`] instead of failing on the first
//! one. Persistence layers call it before writing; it never touches storage.

use serde::Serialize;
use thiserror::Error;

/// What was wrong with a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
  /// A gate value (coherence, verification CI) is under its minimum.
  BelowThreshold { value: f64, min: f64 },
  /// A value lies outside its permitted range.
  OutOfRange { value: f64, min: f64, max: f64 },
  /// A required field is empty.
  Missing,
  /// Any other structural rule.
  Invalid { reason: String },
}

/// A violated constraint at a dotted field path, e.g.
/// `neo_findings.verification_ci`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
  pub path: String,
  #[serde(flatten)]
  pub kind: ViolationKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Error)]
#[error("{} constraint(s) violated: {}", .0.len(), paths(.0))]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<Violation>);

fn paths(v: &[Violation]) -> String {
  v.iter().map(|v| v.path.as_str()).collect::<Vec<_>>().join(", ")
}

impl ValidationErrors {
  pub fn violations(&self) -> &[Violation] { &self.0 }

  /// Whether any violation is reported at `path`.
  pub fn has(&self, path: &str) -> bool { self.0.iter().any(|v| v.path == path) }
}

// ─── Collector ───────────────────────────────────────────────────────────────

/// Accumulates violations while an entity walks its fields.
#[derive(Debug, Default)]
pub struct Validator {
  prefix:     String,
  violations: Vec<Violation>,
}

impl Validator {
  pub fn new() -> Self { Self::default() }

  fn push(&mut self, path: &str, kind: ViolationKind) {
    let path = if self.prefix.is_empty() {
      path.to_owned()
    } else {
      format!("{}.{path}", self.prefix)
    };
    self.violations.push(Violation { path, kind });
  }

  /// Run `f` with every reported path prefixed by `prefix`.
  pub fn nested(&mut self, prefix: &str, f: impl FnOnce(&mut Self)) {
    let next = if self.prefix.is_empty() {
      prefix.to_owned()
    } else {
      format!("{}.{prefix}", self.prefix)
    };
    let saved = std::mem::replace(&mut self.prefix, next);
    f(self);
    self.prefix = saved;
  }

  pub fn required(&mut self, path: &str, value: &str) {
    if value.trim().is_empty() {
      self.push(path, ViolationKind::Missing);
    }
  }

  /// `min <= value <= max`; NaN is always out of range.
  pub fn range(&mut self, path: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
      self.push(path, ViolationKind::OutOfRange { value, min, max });
    }
  }

  /// A score in `[0, 1]`.
  pub fn unit(&mut self, path: &str, value: f64) {
    self.range(path, value, 0.0, 1.0);
  }

  pub fn non_negative(&mut self, path: &str, value: f64) {
    self.range(path, value, 0.0, f64::MAX);
  }

  /// A score in `[0, 1]` that must also reach `min`.
  pub fn gate(&mut self, path: &str, value: f64, min: f64) {
    if !(0.0..=1.0).contains(&value) {
      self.push(path, ViolationKind::OutOfRange { value, min: 0.0, max: 1.0 });
    } else if value < min {
      self.push(path, ViolationKind::BelowThreshold { value, min });
    }
  }

  pub fn invalid(&mut self, path: &str, reason: impl Into<String>) {
    self.push(path, ViolationKind::Invalid { reason: reason.into() });
  }

  pub fn finish(self) -> Result<(), ValidationErrors> {
    if self.violations.is_empty() {
      Ok(())
    } else {
      Err(ValidationErrors(self.violations))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gate_reports_threshold_and_range_separately() {
    let mut v = Validator::new();
    v.gate("a", 0.69, 0.7);
    v.gate("b", 0.70, 0.7);
    v.gate("c", 1.2, 0.7);
    v.gate("d", f64::NAN, 0.7);
    let errs = v.finish().unwrap_err();

    assert_eq!(errs.violations().len(), 3);
    assert!(matches!(
      errs.violations()[0].kind,
      ViolationKind::BelowThreshold { min, .. } if min == 0.7
    ));
    assert!(!errs.has("b"));
    assert!(matches!(errs.violations()[1].kind, ViolationKind::OutOfRange { .. }));
    assert!(errs.has("d"));
  }

  #[test]
  fn nested_paths_are_dotted() {
    let mut v = Validator::new();
    v.nested("ai_analysis", |v| {
      v.required("analysis_id", "");
      v.nested("inner", |v| v.unit("score", -0.1));
    });
    v.required("name", "x");
    let errs = v.finish().unwrap_err();
    assert!(errs.has("ai_analysis.analysis_id"));
    assert!(errs.has("ai_analysis.inner.score"));
    assert_eq!(errs.violations().len(), 2);
  }

  #[test]
  fn serializes_flat() {
    let errs = ValidationErrors(vec![Violation {
      path: "coherence_index".into(),
      kind: ViolationKind::BelowThreshold { value: 0.5, min: 0.7 },
    }]);
    let json = serde_json::to_value(&errs).unwrap();
    assert_eq!(json[0]["path"], "coherence_index");
    assert_eq!(json[0]["kind"], "below_threshold");
    assert_eq!(json[0]["min"], 0.7);
  }
}
