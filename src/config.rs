use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::FetchOptions;
use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the planner backend, e.g. https://planner.example.com
  pub url: String,
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub deduping_interval_ms: u64,
  pub error_retry_count: u32,
  pub error_retry_interval_ms: u64,
  pub keep_previous_data: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let defaults = FetchOptions::default();
    Self {
      deduping_interval_ms: defaults.deduping_interval.as_millis() as u64,
      error_retry_count: defaults.error_retry_count,
      error_retry_interval_ms: defaults.error_retry_interval.as_millis() as u64,
      keep_previous_data: defaults.keep_previous_data,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Failed replays before an action is dropped and reported
  pub max_attempts: u32,
  /// SQLite file holding the queue (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// How long a "failed to sync" notice stays up
  pub failure_display_ms: u64,
  /// First delay before replaying writes that failed while online
  pub retry_interval_ms: u64,
  /// Upper bound for the doubling replay delay
  pub max_retry_interval_ms: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      path: None,
      failure_display_ms: 5_000,
      retry_interval_ms: 1_000,
      max_retry_interval_ms: 60_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter used when PLANNER_LOG is unset
  pub level: String,
  /// Directory for rolling log files (defaults to the data directory)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./planner.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/planner-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/planner-sync/config.yaml\n\
                 with at least `server: {{ url: https://... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("planner.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("planner-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    if config.server.url.trim().is_empty() {
      return Err(eyre!("server.url must not be empty"));
    }
    Ok(config)
  }

  /// Get the planner API token from the environment, if set.
  ///
  /// Requests go out unauthenticated without one.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PLANNER_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Cache and queue settings for a [`SyncContext`](crate::sync::SyncContext).
  pub fn sync_config(&self) -> SyncConfig {
    SyncConfig {
      fetch: FetchOptions {
        deduping_interval: Duration::from_millis(self.cache.deduping_interval_ms),
        error_retry_count: self.cache.error_retry_count,
        error_retry_interval: Duration::from_millis(self.cache.error_retry_interval_ms),
        keep_previous_data: self.cache.keep_previous_data,
      },
      max_attempts: self.queue.max_attempts,
      failure_display: Duration::from_millis(self.queue.failure_display_ms),
      replay_interval: Duration::from_millis(self.queue.retry_interval_ms),
      max_replay_interval: Duration::from_millis(self.queue.max_retry_interval_ms),
    }
  }

  /// Where the offline queue lives.
  pub fn queue_path(&self) -> Result<PathBuf> {
    match &self.queue.path {
      Some(path) => Ok(path.clone()),
      None => crate::queue::SqliteQueueStorage::default_path(),
    }
  }
}
