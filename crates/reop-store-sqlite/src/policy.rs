//! Row-policy lookup.
//!
//! Policies are rows of `row_policies`, installed by migration 6. Before that
//! migration (or after reverting it) no table has policies and every row is
//! visible.

use reop_core::access::{OperatorContext, PolicyAction, PolicyPredicate, owner_filter};
use rusqlite::{Connection, params};

use crate::{Result, encode::decode_variant, migrations::table_exists};

/// Predicates that apply to `action` on `table`. Policies declared for
/// `all` apply to every action.
fn predicates(
  conn: &Connection,
  table: &str,
  action: PolicyAction,
) -> Result<Vec<PolicyPredicate>> {
  if !table_exists(conn, "row_policies")? {
    return Ok(Vec::new());
  }

  let names: Vec<String> = conn
    .prepare(
      "SELECT predicate FROM row_policies
       WHERE table_name = ?1 AND action IN (?2, 'all')",
    )?
    .query_map(params![table, action.to_string()], |r| r.get(0))?
    .collect::<rusqlite::Result<_>>()?;

  names
    .iter()
    .map(|p| decode_variant("policy_predicate", p))
    .collect()
}

/// The operator id rows of `table` must carry for `ctx` to see them, or
/// `None` when access is unrestricted.
///
/// Queries bind the result as `?N` and filter with
/// `(?N IS NULL OR operator_id = ?N)`.
pub(crate) fn row_owner(
  conn: &Connection,
  ctx: &OperatorContext,
  table: &str,
  action: PolicyAction,
) -> Result<Option<String>> {
  Ok(owner_filter(ctx, &predicates(conn, table, action)?))
}
