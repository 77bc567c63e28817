use thiserror::Error;

/// Errors surfaced by the external collaborators in §6 (container runtime,
/// registry client, compose file, operation store). Distinguishes "not
/// found" from "backend failure" so callers can branch on it without
/// string matching.
#[derive(Debug, Error)]
pub enum PortError {
  #[error("not found: {0}")]
  NotFound(String),
  #[error("backend failure: {0}")]
  Backend(String),
}

/// Classified orchestrator errors. `Transient` is retried locally by the
/// stage runner; every other variant transitions the operation to
/// `failed` and is persisted verbatim as `error_message`.
#[derive(Debug, Error)]
pub enum OpError {
  #[error("not found: {0}")]
  NotFound(String),
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error("pre-update check failed: {0}")]
  PreCheckFailed(String),
  #[error("transient failure: {0}")]
  Transient(String),
  #[error("{0}")]
  Fatal(String),
}

impl OpError {
  pub fn is_transient(&self) -> bool {
    matches!(self, OpError::Transient(_))
  }
}

impl From<PortError> for OpError {
  fn from(e: PortError) -> Self {
    match e {
      PortError::NotFound(msg) => OpError::NotFound(msg),
      PortError::Backend(msg) => OpError::Transient(msg),
    }
  }
}
