//! Core types for the cache store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an entry's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
  /// Fresh data from the remote
  #[default]
  Network,
  /// Copied from another cache entry
  Cache,
  /// Written locally while disconnected
  Offline,
}

/// A cached value. Never mutated in place; a new `set` replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub data: Value,
  pub created_at: DateTime<Utc>,
  /// Always strictly after `created_at`
  pub expires_at: DateTime<Utc>,
  /// Estimated serialized size
  pub size_bytes: usize,
  pub source: EntrySource,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

impl CacheEntry {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Within TTL but past 80% of it.
  pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
    let ttl = self.expires_at - self.created_at;
    !self.is_expired(now) && (now - self.created_at) * 5 >= ttl * 4
  }
}

/// Freshness reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
  /// Within TTL
  Fresh,
  /// Within TTL, but in the last 20% of it
  Stale,
  /// Missing or past TTL while connectivity is available
  Expired,
  /// Missing while disconnected; never stored as entry state
  Offline,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
  pub data: Option<Value>,
  pub status: CacheStatus,
  /// Source of the returned entry, if any
  pub source: Option<EntrySource>,
}

impl CacheLookup {
  pub fn hit(entry: &CacheEntry) -> Self {
    Self {
      data: Some(entry.data.clone()),
      status: CacheStatus::Fresh,
      source: Some(entry.source),
    }
  }

  pub fn miss(online: bool) -> Self {
    Self {
      data: None,
      status: if online {
        CacheStatus::Expired
      } else {
        CacheStatus::Offline
      },
      source: None,
    }
  }

  pub fn is_hit(&self) -> bool {
    self.data.is_some()
  }
}

/// Per-call options for `CacheStore::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
  /// Overrides the store's default TTL
  pub ttl: Option<Duration>,
  /// Also write the entry to the durable tier
  pub persist: bool,
  pub source: EntrySource,
  pub version: Option<String>,
}

impl SetOptions {
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn persist(mut self) -> Self {
    self.persist = true;
    self
  }

  pub fn source(mut self, source: EntrySource) -> Self {
    self.source = source;
    self
  }

  pub fn version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }
}

/// Longest TTL an entry may carry (ten years). Longer requests are clamped.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Tunable limits, pushed in by the performance monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
  pub default_ttl: Duration,
  pub max_bytes: usize,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      default_ttl: Duration::minutes(5),
      max_bytes: 50 * 1024 * 1024,
    }
  }
}

/// Snapshot of the memory tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
  pub total_entries: usize,
  pub total_bytes: usize,
  pub max_bytes: usize,
  pub hits: u64,
  pub misses: u64,
  /// hits / (hits + misses), 0 when nothing was recorded yet
  pub hit_rate: f64,
  pub oldest_entry: Option<DateTime<Utc>>,
  pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
  /// Occupancy of the memory tier in percent.
  pub fn usage_percent(&self) -> f64 {
    if self.max_bytes == 0 {
      return 0.0;
    }
    self.total_bytes as f64 / self.max_bytes as f64 * 100.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(ttl_ms: i64) -> CacheEntry {
    let created_at = Utc::now();
    CacheEntry {
      key: "k".to_string(),
      data: Value::Null,
      created_at,
      expires_at: created_at + Duration::milliseconds(ttl_ms),
      size_bytes: 4,
      source: EntrySource::Network,
      version: None,
    }
  }

  #[test]
  fn test_entry_state_transitions() {
    let e = entry(1000);
    let t0 = e.created_at;

    assert!(!e.is_stale(t0 + Duration::milliseconds(500)));
    assert!(e.is_stale(t0 + Duration::milliseconds(800)));
    assert!(!e.is_expired(t0 + Duration::milliseconds(999)));
    assert!(e.is_expired(t0 + Duration::milliseconds(1000)));
    assert!(!e.is_stale(t0 + Duration::milliseconds(1000)));
  }

  #[test]
  fn test_entry_serializes_source_lowercase() {
    let json = serde_json::to_value(entry(10)).unwrap();
    assert_eq!(json["source"], "network");
    assert!(json.get("version").is_none());
  }
}
