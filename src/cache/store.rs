//! Two-tier TTL cache: in-memory map plus an optional durable copy per entry.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::types::{
  CacheEntry, CacheLookup, CacheSettings, CacheStats, CacheStatus, SetOptions, MAX_TTL_SECS,
};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::KeyValueStore;
use crate::sync::Connectivity;

/// Eviction stops once total bytes drop under this share of the limit.
const EVICTION_TARGET_PERCENT: usize = 80;

struct Slot {
  entry: CacheEntry,
  /// Insertion order, breaks ties between equal `created_at`
  seq: u64,
}

#[derive(Default)]
struct CacheState {
  entries: HashMap<String, Slot>,
  total_bytes: usize,
  next_seq: u64,
  hits: u64,
  misses: u64,
}

impl CacheState {
  fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let slot = self.entries.remove(key)?;
    self.total_bytes -= slot.entry.size_bytes;
    Some(slot.entry)
  }

  fn insert(&mut self, entry: CacheEntry) {
    self.remove(&entry.key);
    self.total_bytes += entry.size_bytes;
    let seq = self.next_seq;
    self.next_seq += 1;
    self.entries.insert(entry.key.clone(), Slot { entry, seq });
  }

  /// Two passes: drop everything expired, then the oldest entries by
  /// creation time until under the target and with room for `incoming`.
  ///
  /// This approximates LRU by insertion order; reads do not refresh an entry.
  fn evict(&mut self, now: DateTime<Utc>, incoming: usize, max_bytes: usize) -> Vec<String> {
    let mut evicted: Vec<String> = self
      .entries
      .values()
      .filter(|slot| slot.entry.is_expired(now))
      .map(|slot| slot.entry.key.clone())
      .collect();
    for key in &evicted {
      self.remove(key);
    }

    let target = max_bytes.saturating_mul(EVICTION_TARGET_PERCENT) / 100;
    let fits = incoming <= max_bytes;

    let mut by_age: Vec<(DateTime<Utc>, u64, String)> = self
      .entries
      .values()
      .map(|slot| (slot.entry.created_at, slot.seq, slot.entry.key.clone()))
      .collect();
    by_age.sort();

    for (_, _, key) in by_age {
      let over_target = self.total_bytes > target;
      let no_room = fits && self.total_bytes + incoming > max_bytes;
      if !over_target && !no_room {
        break;
      }
      self.remove(&key);
      evicted.push(key);
    }

    evicted
  }
}

/// TTL-bounded key/value cache with a memory tier and an opt-in durable tier.
///
/// Durable-tier failures are logged and otherwise ignored; every operation
/// keeps working from memory.
pub struct CacheStore {
  namespace: String,
  state: Mutex<CacheState>,
  settings: Mutex<CacheSettings>,
  durable: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  connectivity: Connectivity,
}

impl CacheStore {
  pub fn new(
    namespace: impl Into<String>,
    settings: CacheSettings,
    durable: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      namespace: namespace.into(),
      state: Mutex::new(CacheState::default()),
      settings: Mutex::new(settings),
      durable,
      clock,
      connectivity,
    }
  }

  fn state(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn settings(&self) -> CacheSettings {
    *self.settings.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn durable_key(&self, key: &str) -> String {
    format!("cache:{}:{}", self.namespace, key)
  }

  fn durable_prefix(&self) -> String {
    format!("cache:{}:", self.namespace)
  }

  /// Look up a key.
  ///
  /// A live entry counts as a hit and is reported `fresh`. An entry found only
  /// in the durable tier is hydrated into memory first. Anything else counts as
  /// a miss, reported `expired` when online and `offline` otherwise.
  pub fn get(&self, key: &str) -> CacheLookup {
    let now = self.clock.now();

    {
      let mut state = self.state();
      match state.entries.get(key).map(|slot| slot.entry.is_expired(now)) {
        Some(false) => {
          state.hits += 1;
          return CacheLookup::hit(&state.entries[key].entry);
        }
        Some(true) => {
          state.remove(key);
          debug!(key, "Dropped expired entry");
        }
        None => {}
      }
    }

    match self.load_durable(key) {
      Some(entry) if !entry.is_expired(now) => {
        let lookup = CacheLookup::hit(&entry);
        let evicted = self.insert(entry, now);
        self.remove_durable_all(&evicted);
        self.state().hits += 1;
        debug!(key, "Hydrated entry from durable tier");
        return lookup;
      }
      Some(_) => self.remove_durable(key),
      None => {}
    }

    self.state().misses += 1;
    CacheLookup::miss(self.connectivity.is_online())
  }

  /// Store a value, evicting first if it would push the memory tier over
  /// `max_bytes`. With `persist` the entry is also written to the durable tier.
  ///
  /// An entry larger than `max_bytes` on its own is still stored.
  pub fn set(&self, key: &str, data: Value, options: SetOptions) {
    let now = self.clock.now();
    let ttl = options
      .ttl
      .unwrap_or(self.settings().default_ttl)
      .clamp(Duration::milliseconds(1), Duration::seconds(MAX_TTL_SECS));

    let entry = CacheEntry {
      key: key.to_string(),
      size_bytes: estimate_size(&data),
      data,
      created_at: now,
      expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
      source: options.source,
      version: options.version,
    };

    if options.persist {
      self.store_durable(&entry);
    }
    let evicted = self.insert(entry, now);
    self.remove_durable_all(&evicted);
  }

  fn insert(&self, entry: CacheEntry, now: DateTime<Utc>) -> Vec<String> {
    let max_bytes = self.settings().max_bytes;
    let mut state = self.state();

    if let Some(old) = state.remove(&entry.key) {
      debug!(key = %old.key, "Replacing cache entry");
    }

    let mut evicted = Vec::new();
    if state.total_bytes + entry.size_bytes > max_bytes {
      evicted = state.evict(now, entry.size_bytes, max_bytes);
      debug!(
        count = evicted.len(),
        total_bytes = state.total_bytes,
        "Evicted cache entries"
      );
    }
    if entry.size_bytes > max_bytes {
      warn!(key = %entry.key, size = entry.size_bytes, max_bytes, "Storing entry larger than cache limit");
    }

    state.insert(entry);
    evicted
  }

  /// Remove one entry from both tiers.
  pub fn invalidate(&self, key: &str) {
    self.state().remove(key);
    self.remove_durable(key);
  }

  /// Remove every entry from both tiers and reset hit/miss counters.
  pub fn clear(&self) {
    {
      let mut state = self.state();
      state.entries.clear();
      state.total_bytes = 0;
      state.hits = 0;
      state.misses = 0;
    }
    if let Err(e) = self.durable.remove_prefix(&self.durable_prefix()) {
      warn!(namespace = %self.namespace, error = %e, "Failed to clear durable cache entries");
    }
  }

  /// Status without touching hit/miss counters or the durable tier.
  pub fn status(&self, key: &str) -> CacheStatus {
    let now = self.clock.now();
    let state = self.state();
    match state.entries.get(key) {
      None => {
        if self.connectivity.is_online() {
          CacheStatus::Expired
        } else {
          CacheStatus::Offline
        }
      }
      Some(slot) if slot.entry.is_expired(now) => CacheStatus::Expired,
      Some(slot) if slot.entry.is_stale(now) => CacheStatus::Stale,
      Some(_) => CacheStatus::Fresh,
    }
  }

  pub fn stats(&self) -> CacheStats {
    let max_bytes = self.settings().max_bytes;
    let state = self.state();
    let lookups = state.hits + state.misses;

    CacheStats {
      total_entries: state.entries.len(),
      total_bytes: state.total_bytes,
      max_bytes,
      hits: state.hits,
      misses: state.misses,
      hit_rate: if lookups > 0 {
        state.hits as f64 / lookups as f64
      } else {
        0.0
      },
      oldest_entry: state.entries.values().map(|s| s.entry.created_at).min(),
      newest_entry: state.entries.values().map(|s| s.entry.created_at).max(),
    }
  }

  /// Replace TTL and size limits. Shrinking below the current total runs an
  /// eviction pass immediately.
  pub fn apply_settings(&self, settings: CacheSettings) {
    *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings;

    let evicted = {
      let mut state = self.state();
      if state.total_bytes > settings.max_bytes {
        state.evict(self.clock.now(), 0, settings.max_bytes)
      } else {
        Vec::new()
      }
    };
    self.remove_durable_all(&evicted);
  }

  fn load_durable(&self, key: &str) -> Option<CacheEntry> {
    let bytes = match self.durable.get(&self.durable_key(key)) {
      Ok(bytes) => bytes?,
      Err(e) => {
        warn!(key, error = %e, "Failed to read cache entry from durable tier");
        return None;
      }
    };
    match serde_json::from_slice(&bytes) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, error = %e, "Discarding unreadable durable cache entry");
        self.remove_durable(key);
        None
      }
    }
  }

  fn store_durable(&self, entry: &CacheEntry) {
    let result = serde_json::to_vec(entry)
      .map_err(StoreError::from)
      .and_then(|bytes| self.durable.set(&self.durable_key(&entry.key), &bytes));
    if let Err(e) = result {
      warn!(key = %entry.key, error = %e, "Failed to persist cache entry");
    }
  }

  fn remove_durable(&self, key: &str) {
    if let Err(e) = self.durable.remove(&self.durable_key(key)) {
      warn!(key, error = %e, "Failed to remove durable cache entry");
    }
  }

  fn remove_durable_all(&self, keys: &[String]) {
    for key in keys {
      self.remove_durable(key);
    }
  }
}

/// Estimated payload size: length of its JSON encoding.
pub fn estimate_size(data: &Value) -> usize {
  serde_json::to_string(data).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{MemoryStore, StoreResult};
  use serde_json::json;

  struct Harness {
    cache: CacheStore,
    clock: Arc<ManualClock>,
    durable: Arc<MemoryStore>,
    connectivity: Connectivity,
  }

  fn harness(max_bytes: usize) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let durable = Arc::new(MemoryStore::new());
    let connectivity = Connectivity::new(true);
    let cache = CacheStore::new(
      "test",
      CacheSettings {
        default_ttl: Duration::minutes(5),
        max_bytes,
      },
      durable.clone(),
      clock.clone(),
      connectivity.clone(),
    );
    Harness {
      cache,
      clock,
      durable,
      connectivity,
    }
  }

  /// A payload whose JSON encoding is exactly `n` bytes (n >= 2).
  fn payload(n: usize) -> Value {
    Value::String("x".repeat(n - 2))
  }

  struct FailingStore;

  impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
      Err(StoreError::Lock("disk gone".to_string()))
    }
    fn set(&self, _key: &str, _value: &[u8]) -> StoreResult<()> {
      Err(StoreError::Lock("disk gone".to_string()))
    }
    fn remove(&self, _key: &str) -> StoreResult<()> {
      Err(StoreError::Lock("disk gone".to_string()))
    }
    fn remove_prefix(&self, _prefix: &str) -> StoreResult<usize> {
      Err(StoreError::Lock("disk gone".to_string()))
    }
  }

  #[test]
  fn test_fresh_then_expired_after_ttl() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!({"v": 1}),
      SetOptions::default().ttl(Duration::milliseconds(1000)),
    );

    h.clock.advance(Duration::milliseconds(500));
    let lookup = h.cache.get("k");
    assert_eq!(lookup.status, CacheStatus::Fresh);
    assert_eq!(lookup.data, Some(json!({"v": 1})));

    // Reads don't change the stored entry
    assert_eq!(h.cache.get("k").data, Some(json!({"v": 1})));

    h.clock.advance(Duration::milliseconds(1000));
    let lookup = h.cache.get("k");
    assert_eq!(lookup.status, CacheStatus::Expired);
    assert_eq!(lookup.data, None);
    assert_eq!(h.cache.stats().total_entries, 0);
  }

  #[test]
  fn test_huge_ttl_is_clamped() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!(1),
      SetOptions::default().ttl(Duration::seconds(1_000_000_000_000_000)),
    );

    h.clock.advance(Duration::days(365));
    assert_eq!(h.cache.get("k").status, CacheStatus::Fresh);

    h.clock.advance(Duration::seconds(MAX_TTL_SECS));
    assert!(!h.cache.get("k").is_hit());
  }

  #[test]
  fn test_expiry_is_inclusive() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!(1),
      SetOptions::default().ttl(Duration::milliseconds(1000)),
    );
    h.clock.advance(Duration::milliseconds(1000));
    assert_eq!(h.cache.get("k").status, CacheStatus::Expired);
  }

  #[test]
  fn test_miss_while_offline_reports_offline() {
    let h = harness(1024);
    h.connectivity.set_online(false);
    let lookup = h.cache.get("missing");
    assert_eq!(lookup.status, CacheStatus::Offline);
    assert!(!lookup.is_hit());
  }

  #[test]
  fn test_hit_rate_accounting() {
    let h = harness(1024);
    assert_eq!(h.cache.stats().hit_rate, 0.0);

    h.cache.set("a", json!(1), SetOptions::default());
    h.cache.get("a");
    h.cache.get("a");
    h.cache.get("a");
    h.cache.get("b");

    let stats = h.cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);

    h.cache.clear();
    assert_eq!(h.cache.stats().hit_rate, 0.0);
  }

  #[test]
  fn test_status_follows_entry_state_machine() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!(1),
      SetOptions::default().ttl(Duration::milliseconds(1000)),
    );
    assert_eq!(h.cache.status("k"), CacheStatus::Fresh);

    h.clock.advance(Duration::milliseconds(850));
    assert_eq!(h.cache.status("k"), CacheStatus::Stale);
    // get still serves a live entry as fresh
    assert_eq!(h.cache.get("k").status, CacheStatus::Fresh);

    h.clock.advance(Duration::milliseconds(200));
    assert_eq!(h.cache.status("k"), CacheStatus::Expired);

    h.connectivity.set_online(false);
    assert_eq!(h.cache.status("other"), CacheStatus::Offline);

    // status never counts as a lookup
    assert_eq!(h.cache.stats().hits, 1);
    assert_eq!(h.cache.stats().misses, 0);
  }

  #[test]
  fn test_persist_flag_controls_durable_tier() {
    let h = harness(1024);
    h.cache.set("memory-only", json!(1), SetOptions::default());
    h.cache.set("durable", json!(2), SetOptions::default().persist());

    assert!(h.durable.get("cache:test:memory-only").unwrap().is_none());
    assert!(h.durable.get("cache:test:durable").unwrap().is_some());
  }

  #[test]
  fn test_hydrates_from_durable_tier() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!({"name": "x"}),
      SetOptions::default().persist().version("v2"),
    );

    // A second store over the same durable tier simulates a restart
    let restarted = CacheStore::new(
      "test",
      h.cache.settings(),
      h.durable.clone(),
      h.clock.clone(),
      h.connectivity.clone(),
    );
    assert_eq!(restarted.stats().total_entries, 0);

    let lookup = restarted.get("k");
    assert_eq!(lookup.status, CacheStatus::Fresh);
    assert_eq!(lookup.data, Some(json!({"name": "x"})));
    assert_eq!(restarted.stats().total_entries, 1);
    assert_eq!(restarted.stats().hits, 1);
  }

  #[test]
  fn test_expired_durable_entry_is_removed() {
    let h = harness(1024);
    h.cache.set(
      "k",
      json!(1),
      SetOptions::default()
        .persist()
        .ttl(Duration::milliseconds(100)),
    );
    h.clock.advance(Duration::milliseconds(200));

    assert_eq!(h.cache.get("k").status, CacheStatus::Expired);
    assert!(h.durable.get("cache:test:k").unwrap().is_none());
  }

  #[test]
  fn test_invalidate_and_clear_touch_both_tiers() {
    let h = harness(1024);
    h.cache.set("a", json!(1), SetOptions::default().persist());
    h.cache.set("b", json!(2), SetOptions::default().persist());
    h.durable.set("cache:other:c", b"{}").unwrap();

    h.cache.invalidate("a");
    assert!(h.durable.get("cache:test:a").unwrap().is_none());
    assert!(!h.cache.get("a").is_hit());

    h.cache.clear();
    assert_eq!(h.cache.stats().total_entries, 0);
    assert!(h.durable.get("cache:test:b").unwrap().is_none());
    // Other namespaces are untouched
    assert!(h.durable.get("cache:other:c").unwrap().is_some());
  }

  #[test]
  fn test_eviction_drops_expired_first() {
    let h = harness(100);
    h.cache.set(
      "short",
      payload(40),
      SetOptions::default().ttl(Duration::milliseconds(10)),
    );
    h.clock.advance(Duration::milliseconds(5));
    h.cache.set("long", payload(40), SetOptions::default());
    h.clock.advance(Duration::milliseconds(10));

    h.cache.set("new", payload(30), SetOptions::default());

    let stats = h.cache.stats();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_bytes, 70);
    assert!(h.cache.get("long").is_hit());
    assert!(h.cache.get("new").is_hit());
  }

  #[test]
  fn test_eviction_drops_oldest_until_under_limit() {
    let h = harness(100);
    for key in ["a", "b", "c", "d"] {
      h.cache.set(key, payload(25), SetOptions::default());
      h.clock.advance(Duration::milliseconds(1));
    }
    assert_eq!(h.cache.stats().total_bytes, 100);

    h.cache.set("e", payload(25), SetOptions::default());

    let stats = h.cache.stats();
    assert!(stats.total_bytes <= 100);
    assert!(!h.cache.get("a").is_hit());
    assert!(h.cache.get("e").is_hit());
    assert!(h.cache.get("d").is_hit());
  }

  #[test]
  fn test_eviction_uses_insertion_order_on_equal_timestamps() {
    let h = harness(100);
    h.cache.set("first", payload(50), SetOptions::default());
    h.cache.set("second", payload(50), SetOptions::default());
    h.cache.set("third", payload(50), SetOptions::default());

    assert!(!h.cache.get("first").is_hit());
    assert!(h.cache.get("third").is_hit());
    assert!(h.cache.stats().total_bytes <= 100);
  }

  #[test]
  fn test_total_never_exceeds_limit_after_set() {
    let h = harness(500);
    for i in 0..200 {
      let size = 10 + (i * 37) % 90;
      h.cache.set(&format!("k{i}"), payload(size), SetOptions::default());
      h.clock.advance(Duration::milliseconds(3));
      assert!(h.cache.stats().total_bytes <= 500, "over limit at {i}");
    }
  }

  #[test]
  fn test_oversized_entry_is_still_stored() {
    let h = harness(100);
    h.cache.set("small", payload(10), SetOptions::default());
    h.cache.set("huge", payload(150), SetOptions::default());

    assert!(h.cache.get("huge").is_hit());
    assert!(h.cache.get("small").is_hit());
    assert_eq!(h.cache.stats().total_bytes, 160);
  }

  #[test]
  fn test_replacing_key_does_not_double_count() {
    let h = harness(100);
    h.cache.set("k", payload(60), SetOptions::default());
    h.cache.set("k", payload(60), SetOptions::default());

    let stats = h.cache.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_bytes, 60);
  }

  #[test]
  fn test_shrinking_settings_evicts() {
    let h = harness(1000);
    for key in ["a", "b", "c"] {
      h.cache.set(key, payload(100), SetOptions::default());
      h.clock.advance(Duration::milliseconds(1));
    }
    h.cache.apply_settings(CacheSettings {
      default_ttl: Duration::minutes(1),
      max_bytes: 200,
    });

    let stats = h.cache.stats();
    assert!(stats.total_bytes <= 160);
    assert_eq!(h.cache.settings().default_ttl, Duration::minutes(1));
    assert!(!h.cache.get("a").is_hit());
  }

  #[test]
  fn test_durable_failures_degrade_to_memory() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = CacheStore::new(
      "test",
      CacheSettings::default(),
      Arc::new(FailingStore),
      clock,
      Connectivity::new(true),
    );

    cache.set("k", json!([1, 2, 3]), SetOptions::default().persist());
    assert_eq!(cache.get("k").data, Some(json!([1, 2, 3])));
    assert!(!cache.get("missing").is_hit());
    cache.invalidate("k");
    cache.clear();
  }

  #[test]
  fn test_stats_report_entry_age_bounds() {
    let h = harness(1024);
    let t0 = h.clock.now();
    h.cache.set("a", json!(1), SetOptions::default());
    h.clock.advance(Duration::seconds(10));
    h.cache.set("b", json!(2), SetOptions::default());

    let stats = h.cache.stats();
    assert_eq!(stats.oldest_entry, Some(t0));
    assert_eq!(stats.newest_entry, Some(t0 + Duration::seconds(10)));
  }
}
