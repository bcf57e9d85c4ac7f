//! Non-durable store implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::{KeyValueStore, StoreResult};
use crate::error::StoreError;

/// Process-local store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| StoreError::Lock(e.to_string()))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| StoreError::Lock(e.to_string()))?;
    entries.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> StoreResult<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| StoreError::Lock(e.to_string()))?;
    entries.remove(key);
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> StoreResult<usize> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| StoreError::Lock(e.to_string()))?;
    let before = entries.len();
    entries.retain(|k, _| !k.starts_with(prefix));
    Ok(before - entries.len())
  }
}

/// Storage implementation that doesn't keep anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStore;

impl KeyValueStore for NoopStore {
  fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &[u8]) -> StoreResult<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> StoreResult<()> {
    Ok(())
  }

  fn remove_prefix(&self, _prefix: &str) -> StoreResult<usize> {
    Ok(0)
  }
}
