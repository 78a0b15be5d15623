//! Request-scoped principal and row-access policy declarations.
//!
//! There is no ambient "current operator". Every data-access call receives an
//! [`OperatorContext`]; storage backends combine it with the policies below to
//! decide which rows are visible.

use serde::{Deserialize, Serialize};

/// Who is performing a data-access call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorContext {
  pub operator_id: String,
  pub role:        Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  /// A human operator; subject to row policies.
  Operator,
  /// Batch jobs and migrations; bypasses row policies.
  System,
}

impl OperatorContext {
  pub fn operator(operator_id: impl Into<String>) -> Self {
    Self { operator_id: operator_id.into(), role: Role::Operator }
  }

  pub fn system() -> Self {
    Self { operator_id: "system".to_owned(), role: Role::System }
  }

  pub fn is_system(&self) -> bool { self.role == Role::System }
}

// ─── Policies ────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum PolicyAction {
  Select,
  Insert,
  All,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum PolicyPredicate {
  /// Row visible only when its `operator_id` equals the caller's.
  OperatorSelf,
  /// Unconditional.
  Always,
}

/// A declared row-access policy on a relational table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPolicy {
  pub table:     &'static str,
  pub name:      &'static str,
  pub action:    PolicyAction,
  pub predicate: PolicyPredicate,
}

/// Policies installed when row-level security is enabled.
pub const ROW_POLICIES: &[RowPolicy] = &[
  RowPolicy {
    table:     "target_profiles",
    name:      "target_profiles_operator_self",
    action:    PolicyAction::All,
    predicate: PolicyPredicate::OperatorSelf,
  },
  RowPolicy {
    table:     "pure_collapse_commands",
    name:      "commands_operator_self",
    action:    PolicyAction::All,
    predicate: PolicyPredicate::OperatorSelf,
  },
  RowPolicy {
    table:     "command_execution_logs",
    name:      "execution_logs_operator_self",
    action:    PolicyAction::All,
    predicate: PolicyPredicate::OperatorSelf,
  },
  RowPolicy {
    table:     "command_documentation",
    name:      "documentation_operator_self",
    action:    PolicyAction::All,
    predicate: PolicyPredicate::OperatorSelf,
  },
  RowPolicy {
    table:     "harmonic_frequency_logs",
    name:      "harmonic_logs_system_insert",
    action:    PolicyAction::Insert,
    predicate: PolicyPredicate::Always,
  },
  RowPolicy {
    table:     "coherence_index_logs",
    name:      "coherence_logs_system_insert",
    action:    PolicyAction::Insert,
    predicate: PolicyPredicate::Always,
  },
  RowPolicy {
    table:     "biochemical_tracking",
    name:      "biochemical_system_insert",
    action:    PolicyAction::Insert,
    predicate: PolicyPredicate::Always,
  },
];

/// Decide whether the caller must be restricted to its own rows, given the
/// predicates that apply to a table and action.
///
/// Returns the operator id to filter on, or `None` for unrestricted access.
/// A table with no applicable policy has row security disabled.
pub fn owner_filter(
  ctx: &OperatorContext,
  predicates: &[PolicyPredicate],
) -> Option<String> {
  if ctx.is_system()
    || predicates.is_empty()
    || predicates.contains(&PolicyPredicate::Always)
  {
    None
  } else {
    Some(ctx.operator_id.clone())
  }
}
