//! Durable key/value store interface.

use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Namespaced key/value store that survives process restarts.
///
/// Keys are plain strings such as `cache:<namespace>:<key>` or `offlineQueue`;
/// values are opaque bytes (the callers store JSON).
pub trait KeyValueStore: Send + Sync {
  /// Read a value, `None` if the key was never written or has been removed.
  fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

  /// Insert or replace a value.
  fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

  /// Remove a value. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> StoreResult<()>;

  /// Remove every key starting with `prefix`, returning how many were removed.
  fn remove_prefix(&self, prefix: &str) -> StoreResult<usize>;
}
