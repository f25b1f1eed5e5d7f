//! Core traits and types for the caching system.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SyncError;

/// Canonical request descriptor: a resource name followed by the serialized
/// parameters, separated by `:` (e.g. `weekly:2025:2:20`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(key: impl Into<String>) -> Self {
    Self(key.into())
  }

  /// Resource family, the part before the first `:`.
  pub fn resource(&self) -> &str {
    self.0.split(':').next().unwrap_or_default()
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Typed description of a request that can be turned into a [`CacheKey`].
pub trait QueryKey {
  fn cache_key(&self) -> CacheKey;

  /// Human readable label for logs.
  fn description(&self) -> String;
}

/// Per-request cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
  /// Age after which cached data warrants a background refetch
  pub deduping_interval: Duration,
  /// Retries after the first failed attempt (transient errors only)
  pub error_retry_count: u32,
  /// Base delay between retries, doubled on each attempt
  pub error_retry_interval: Duration,
  /// Keep showing the last good value while revalidating or after a failure
  pub keep_previous_data: bool,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      deduping_interval: Duration::from_secs(2),
      error_retry_count: 3,
      error_retry_interval: Duration::from_secs(5),
      keep_previous_data: true,
    }
  }
}

impl FetchOptions {
  /// Delay before retry number `attempt` (1-based).
  pub fn retry_delay(&self, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    self.error_retry_interval.saturating_mul(factor)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched (if from cache)
  pub fetched_at: Option<Instant>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, fetched_at: Option<Instant>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      fetched_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, older than the deduping interval; a refetch was started
  CacheStale,
}

/// What subscribers of a key see.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
  pub data: Option<T>,
  pub error: Option<SyncError>,
  /// A request for this key is outstanding
  pub is_validating: bool,
  /// Generation of the request (or local mutation) that produced `data`
  pub generation: u64,
}

impl<T> Default for Snapshot<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      is_validating: false,
      generation: 0,
    }
  }
}
