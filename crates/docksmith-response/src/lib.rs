//! Thin `IntoResponse` wrappers so handler code can return a typed value
//! or a pre-serialized JSON string without repeating the same boilerplate.

use axum::{http::StatusCode, response::IntoResponse};
use serde::Serialize;

pub struct Response<T>(pub T);

impl<T: Serialize> IntoResponse for Response<T> {
  fn into_response(self) -> axum::response::Response {
    match serde_json::to_string(&self.0) {
      Ok(body) => (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
      )
        .into_response(),
      Err(e) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("failed to serialize response: {e}"),
      )
        .into_response(),
    }
  }
}

/// A response body that is already a JSON string, avoiding a
/// serialize-then-parse round trip.
pub struct JsonString(pub String);

impl IntoResponse for JsonString {
  fn into_response(self) -> axum::response::Response {
    (
      StatusCode::OK,
      [(axum::http::header::CONTENT_TYPE, "application/json")],
      self.0,
    )
      .into_response()
  }
}
