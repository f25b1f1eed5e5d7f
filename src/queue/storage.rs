//! Queue storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::action::QueueSnapshot;

/// Synchronous key-value persistence for the offline queue.
///
/// Callers always read and write the whole snapshot.
pub trait QueueStorage: Send + Sync {
  /// Load the persisted snapshot, or an empty one if nothing was saved yet.
  fn load(&self) -> Result<QueueSnapshot>;

  /// Replace the persisted snapshot.
  fn save(&self, snapshot: &QueueSnapshot) -> Result<()>;
}

/// Storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryQueueStorage {
  snapshot: Mutex<QueueSnapshot>,
}

impl MemoryQueueStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueueStorage for MemoryQueueStorage {
  fn load(&self) -> Result<QueueSnapshot> {
    let snapshot = self
      .snapshot
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(snapshot.clone())
  }

  fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
    let mut current = self
      .snapshot
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *current = snapshot.clone();
    Ok(())
  }
}

/// Key under which the queue snapshot is stored.
const QUEUE_KEY: &str = "offline_queue";

/// SQLite-based queue storage implementation.
pub struct SqliteQueueStorage {
  conn: Mutex<Connection>,
}

impl SqliteQueueStorage {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("planner-sync").join("queue.db"))
  }

  /// Run database migrations for the key-value table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for queue tables.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl QueueStorage for SqliteQueueStorage {
  fn load(&self) -> Result<QueueSnapshot> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let value: Option<String> = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![QUEUE_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read offline queue: {}", e))?;

    match value {
      Some(json) => {
        serde_json::from_str(&json).map_err(|e| eyre!("Failed to parse offline queue: {}", e))
      }
      None => Ok(QueueSnapshot::default()),
    }
  }

  fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let json =
      serde_json::to_string(snapshot).map_err(|e| eyre!("Failed to serialize offline queue: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![QUEUE_KEY, json],
      )
      .map_err(|e| eyre!("Failed to store offline queue: {}", e))?;

    Ok(())
  }
}
