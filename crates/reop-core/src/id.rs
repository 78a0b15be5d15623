//! Identifier synthesis for records saved without one.

use chrono::Utc;
use uuid::Uuid;

/// Build `<prefix>_<unix-millis>_<9 hex chars>`.
pub fn synthesize_id(prefix: &str) -> String {
  let millis = Utc::now().timestamp_millis();
  let random = Uuid::new_v4().simple().to_string();
  format!("{prefix}_{millis}_{}", &random[..9])
}

/// Fill `slot` with a synthesized id if it is blank. Returns `true` if it
/// did.
pub fn ensure_id(slot: &mut String, prefix: &str) -> bool {
  if slot.trim().is_empty() {
    *slot = synthesize_id(prefix);
    true
  } else {
    false
  }
}
