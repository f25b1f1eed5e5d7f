use thiserror::Error;

/// Failure surfaced by the sync core.
///
/// Only `Network` is transient: fetches and queued replays retry it with
/// backoff. Every other variant is final for the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  /// Connection refused, timeout, 5xx and the like
  #[error("network error: {0}")]
  Network(String),

  /// The server understood the request and refused it (validation, missing resource)
  #[error("rejected by server: {0}")]
  Rejected(String),

  #[error("not authorized: {0}")]
  Unauthorized(String),

  /// Response body did not match the expected shape
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// Local persistence failed
  #[error("storage error: {0}")]
  Storage(String),

  #[error("sync context has been disposed")]
  Disposed,
}

impl SyncError {
  /// Whether retrying the same request can succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, SyncError::Network(_))
  }

  pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
    SyncError::Storage(err.to_string())
  }
}
