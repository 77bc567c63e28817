//! Maps `OpError` onto the HTTP status codes spec.md assigns each kind,
//! the same pattern the teacher's `response`/`serror` crates serve for
//! its own handlers — kept local here since only this crate's handler
//! layer needs it.

use axum::{http::StatusCode, response::IntoResponse};
use docksmith_core::error::OpError;
use serde_json::json;

pub struct ApiError(pub OpError);

impl From<OpError> for ApiError {
  fn from(e: OpError) -> Self {
    ApiError(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    let status = match &self.0 {
      OpError::NotFound(_) => StatusCode::NOT_FOUND,
      OpError::BadRequest(_) => StatusCode::BAD_REQUEST,
      OpError::PreCheckFailed(_) => StatusCode::CONFLICT,
      OpError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
      OpError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, axum::Json(json!({ "error": self.0.to_string() }))).into_response()
  }
}
