//! The `x-operator-id` header extractor.

use axum::{extract::FromRequestParts, http::request::Parts};
use reop_core::access::OperatorContext;

use crate::error::ApiError;

pub const OPERATOR_HEADER: &str = "x-operator-id";

/// The calling operator. Rejects with 401 when the header is missing or
/// blank.
pub struct Operator(pub OperatorContext);

impl<S> FromRequestParts<S> for Operator
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &S,
  ) -> Result<Self, Self::Rejection> {
    let id = parts
      .headers
      .get(OPERATOR_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .ok_or(ApiError::Unauthorized)?;
    Ok(Operator(OperatorContext::operator(id)))
  }
}
