//! SQLite-backed durable store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{KeyValueStore, StoreResult};
use crate::error::StoreError;

/// SQLite-based key/value storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> StoreResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Open a private in-memory database. Nothing survives the process.
  pub fn open_in_memory() -> StoreResult<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("syncstash").join("store.db"))
  }

  fn with_connection(conn: Connection) -> StoreResult<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Lock(e.to_string()))
  }

  /// Run database migrations for the store table.
  fn run_migrations(&self) -> StoreResult<()> {
    self.conn()?.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }
}

/// Schema for the key/value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KeyValueStore for SqliteStore {
  fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> StoreResult<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> StoreResult<usize> {
    let conn = self.conn()?;
    // substr comparison avoids LIKE wildcards hidden in user keys
    let removed = conn.execute(
      "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1",
      params![prefix],
    )?;
    Ok(removed)
  }
}
