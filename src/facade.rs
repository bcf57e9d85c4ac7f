//! Read-through queries and write-or-queue mutations over the data layer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStatus, CacheStore, EntrySource, SetOptions};
use crate::monitor::PerformanceMonitor;
use crate::queue::{Mutation, OfflineMutationQueue, OfflineQueueItem, RemoteApply};
use crate::sync::Connectivity;

/// Cache key for a query: a namespace plus its parameters.
///
/// Parameters are hashed from their JSON form. `serde_json` keeps object
/// keys sorted, so equal parameters always produce the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryKey {
  namespace: String,
  params: Value,
}

impl QueryKey {
  pub fn new(namespace: impl Into<String>, params: Value) -> Self {
    Self {
      namespace: namespace.into(),
      params,
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// `<namespace>:<sha256 of params>`
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.params.to_string().as_bytes());
    format!("{}:{}", self.namespace, hex::encode(hasher.finalize()))
  }

  pub fn description(&self) -> String {
    if self.params.is_null() {
      self.namespace.clone()
    } else {
      format!("{} {}", self.namespace, self.params)
    }
  }
}

/// Query result with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched<T> {
  pub data: T,
  pub source: EntrySource,
  pub status: CacheStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum MutationOutcome {
  Applied,
  Queued { item: OfflineQueueItem },
}

/// Entry point for consumers: combines the cache, queue, remote and monitor
/// behind two calls.
pub struct DataAccess {
  cache: Arc<CacheStore>,
  queue: Arc<OfflineMutationQueue>,
  remote: Arc<dyn RemoteApply>,
  monitor: Arc<PerformanceMonitor>,
  connectivity: Connectivity,
}

impl DataAccess {
  pub fn new(
    cache: Arc<CacheStore>,
    queue: Arc<OfflineMutationQueue>,
    remote: Arc<dyn RemoteApply>,
    monitor: Arc<PerformanceMonitor>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      cache,
      queue,
      remote,
      monitor,
      connectivity,
    }
  }

  pub fn cache(&self) -> &Arc<CacheStore> {
    &self.cache
  }

  pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
    &self.monitor
  }

  /// Read through the cache.
  ///
  /// 1. Fresh entry: return it
  /// 2. Stale entry: refetch when online, falling back to the stale data
  /// 3. Missing: fetch and cache the result
  ///
  /// `options` applies to whatever gets written back, so callers choose the
  /// TTL and whether the result reaches the durable tier.
  pub async fn query<T, E, F, Fut>(
    &self,
    key: &QueryKey,
    options: SetOptions,
    fetch: F,
  ) -> Result<Fetched<T>, E>
  where
    T: Serialize + DeserializeOwned,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let cache_key = key.cache_key();
    debug!(query = %key.description(), key = %cache_key, "Query");
    self
      .monitor
      .execute(key.namespace(), Some(&cache_key), || {
        self.read_through(&cache_key, options, fetch)
      })
      .await
  }

  async fn read_through<T, E, F, Fut>(
    &self,
    cache_key: &str,
    options: SetOptions,
    fetch: F,
  ) -> Result<Fetched<T>, E>
  where
    T: Serialize + DeserializeOwned,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    if let Some((data, source)) = self.cached::<T>(cache_key) {
      // Read after `get` so entries hydrated from the durable tier count
      let status = self.cache.status(cache_key);
      if status != CacheStatus::Stale || !self.connectivity.is_online() {
        return Ok(Fetched {
          data,
          source,
          status,
        });
      }

      return match fetch().await {
        Ok(fresh) => Ok(self.store(cache_key, options, fresh)),
        Err(e) => {
          warn!(key = cache_key, error = %e, "Refetch failed, serving stale entry");
          Ok(Fetched {
            data,
            source: EntrySource::Cache,
            status: CacheStatus::Stale,
          })
        }
      };
    }

    let data = fetch().await?;
    Ok(self.store(cache_key, options, data))
  }

  fn cached<T: DeserializeOwned>(&self, cache_key: &str) -> Option<(T, EntrySource)> {
    let lookup = self.cache.get(cache_key);
    let source = lookup.source.unwrap_or_default();
    match serde_json::from_value(lookup.data?) {
      Ok(data) => Some((data, source)),
      Err(e) => {
        debug!(key = cache_key, error = %e, "Cached entry has a different shape, dropping it");
        self.cache.invalidate(cache_key);
        None
      }
    }
  }

  fn store<T: Serialize>(&self, cache_key: &str, options: SetOptions, data: T) -> Fetched<T> {
    match serde_json::to_value(&data) {
      Ok(value) => self.cache.set(cache_key, value, options),
      Err(e) => warn!(key = cache_key, error = %e, "Result not cacheable"),
    }

    Fetched {
      data,
      source: EntrySource::Network,
      status: CacheStatus::Fresh,
    }
  }

  /// Apply a write directly when online; queue it when offline or when the
  /// remote refuses it.
  pub async fn mutate(&self, mutation: Mutation) -> MutationOutcome {
    let operation = format!("mutate:{}", mutation.action);
    let result = self
      .monitor
      .execute(&operation, None, || async move {
        Ok::<_, Infallible>(self.apply_or_enqueue(mutation).await)
      })
      .await;

    match result {
      Ok(outcome) => outcome,
      Err(never) => match never {},
    }
  }

  async fn apply_or_enqueue(&self, mutation: Mutation) -> MutationOutcome {
    if self.connectivity.is_online() {
      match self
        .remote
        .apply(&mutation.endpoint, mutation.action, &mutation.payload)
        .await
      {
        Ok(()) => {
          for key in &mutation.invalidates {
            self.cache.invalidate(key);
          }
          return MutationOutcome::Applied;
        }
        Err(e) => warn!(endpoint = %mutation.endpoint, error = %e, "Direct apply failed, queueing"),
      }
    }

    MutationOutcome::Queued {
      item: self.queue.enqueue_mutation(mutation),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSettings;
  use crate::clock::{Clock, ManualClock};
  use crate::error::ApplyError;
  use crate::monitor::{AlertThresholds, MonitorSettings};
  use crate::queue::{MutationAction, QueueSettings};
  use crate::store::{KeyValueStore, MemoryStore};
  use async_trait::async_trait;
  use chrono::{Duration, Utc};
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  #[derive(Default)]
  struct ToggleRemote {
    fail: AtomicBool,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl RemoteApply for ToggleRemote {
    async fn apply(
      &self,
      _endpoint: &str,
      _action: MutationAction,
      _payload: &Value,
    ) -> Result<(), ApplyError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail.load(Ordering::SeqCst) {
        Err(ApplyError::from_status(503, "unavailable"))
      } else {
        Ok(())
      }
    }
  }

  struct Fixture {
    access: DataAccess,
    clock: Arc<ManualClock>,
    remote: Arc<ToggleRemote>,
    queue: Arc<OfflineMutationQueue>,
    connectivity: Connectivity,
    store: Arc<dyn KeyValueStore>,
  }

  fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let connectivity = Connectivity::new(true);
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let cache = Arc::new(CacheStore::new(
      "test",
      CacheSettings::default(),
      store.clone(),
      clock.clone() as Arc<dyn Clock>,
      connectivity.clone(),
    ));
    let remote = Arc::new(ToggleRemote::default());
    let queue = Arc::new(OfflineMutationQueue::new(
      QueueSettings::default(),
      store.clone(),
      remote.clone(),
      clock.clone(),
    ));
    let monitor = Arc::new(PerformanceMonitor::new(
      cache.clone(),
      store.clone(),
      clock.clone(),
      MonitorSettings::default(),
      AlertThresholds::default(),
    ));

    Fixture {
      access: DataAccess::new(cache, queue.clone(), remote.clone(), monitor, connectivity.clone()),
      clock,
      remote,
      queue,
      connectivity,
      store,
    }
  }

  impl Fixture {
    /// Cache over the same durable store with an empty memory tier.
    fn reopened_cache(&self) -> CacheStore {
      CacheStore::new(
        "test",
        CacheSettings::default(),
        self.store.clone(),
        self.clock.clone() as Arc<dyn Clock>,
        self.connectivity.clone(),
      )
    }
  }

  #[test]
  fn test_query_key_ignores_param_order() {
    let a = QueryKey::new("supplements", json!({"page": 1, "filter": "vitamin"}));
    let b = QueryKey::new("supplements", json!({"filter": "vitamin", "page": 1}));
    let c = QueryKey::new("supplements", json!({"filter": "vitamin", "page": 2}));
    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
    assert!(a.cache_key().starts_with("supplements:"));
    assert_eq!(a.cache_key().len(), "supplements:".len() + 64);
  }

  #[tokio::test]
  async fn test_query_reads_through_cache() {
    let f = fixture();
    let key = QueryKey::new("items", json!({"page": 1}));
    let fetches = AtomicUsize::new(0);

    for _ in 0..3 {
      let fetched = f
        .access
        .query(&key, SetOptions::default(), || async {
          fetches.fetch_add(1, Ordering::SeqCst);
          Ok::<_, String>(vec![1, 2, 3])
        })
        .await
        .unwrap();
      assert_eq!(fetched.data, vec![1, 2, 3]);
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let metrics = f.access.monitor().recent_metrics(10);
    assert_eq!(metrics.len(), 3);
    assert!(!metrics[0].cache_hit);
    assert!(metrics[1].cache_hit && metrics[2].cache_hit);
    assert_eq!(metrics[0].operation, "items");
  }

  #[tokio::test]
  async fn test_caller_decides_persistence() {
    let f = fixture();
    let kept = QueryKey::new("items", json!({"page": 1}));
    let transient = QueryKey::new("items", json!({"page": 2}));

    f.access
      .query(&kept, SetOptions::default().persist(), || async {
        Ok::<_, String>(1)
      })
      .await
      .unwrap();
    f.access
      .query(&transient, SetOptions::default(), || async {
        Ok::<_, String>(2)
      })
      .await
      .unwrap();

    let reopened = f.reopened_cache();
    assert_eq!(reopened.get(&kept.cache_key()).data, Some(json!(1)));
    assert!(!reopened.get(&transient.cache_key()).is_hit());
  }

  #[tokio::test]
  async fn test_stale_entry_served_when_refetch_fails() {
    let f = fixture();
    let key = QueryKey::new("items", Value::Null);
    f.access
      .query(&key, SetOptions::default(), || async { Ok::<_, String>("v1".to_string()) })
      .await
      .unwrap();

    // 4.5 of 5 minutes: stale but live
    f.clock.advance(Duration::seconds(270));
    let fetched = f
      .access
      .query(&key, SetOptions::default(), || async { Err::<String, _>("down".to_string()) })
      .await
      .unwrap();
    assert_eq!(fetched.data, "v1");
    assert_eq!(fetched.status, CacheStatus::Stale);

    let refreshed = f
      .access
      .query(&key, SetOptions::default(), || async { Ok::<_, String>("v2".to_string()) })
      .await
      .unwrap();
    assert_eq!(refreshed.data, "v2");
    assert_eq!(refreshed.source, EntrySource::Network);
  }

  #[tokio::test]
  async fn test_miss_propagates_fetch_error() {
    let f = fixture();
    let key = QueryKey::new("items", Value::Null);
    let err = f
      .access
      .query(&key, SetOptions::default(), || async { Err::<u32, _>("boom".to_string()) })
      .await
      .unwrap_err();
    assert_eq!(err, "boom");
    assert!(!f.access.monitor().recent_metrics(1)[0].success);
  }

  #[tokio::test]
  async fn test_mutate_online_applies_and_invalidates() {
    let f = fixture();
    f.access.cache().set("item:1", json!("old"), SetOptions::default());

    let outcome = f
      .access
      .mutate(Mutation::new(MutationAction::Update, "/items/1", json!({})).invalidates(["item:1"]))
      .await;

    assert!(matches!(outcome, MutationOutcome::Applied));
    assert!(!f.access.cache().get("item:1").is_hit());
    assert!(f.queue.is_empty());
    assert_eq!(f.access.monitor().recent_metrics(1)[0].operation, "mutate:update");
  }

  #[tokio::test]
  async fn test_mutate_offline_queues_without_calling_remote() {
    let f = fixture();
    f.connectivity.set_online(false);

    let outcome = f
      .access
      .mutate(Mutation::new(MutationAction::Create, "/items", json!({"n": 1})))
      .await;

    assert!(matches!(outcome, MutationOutcome::Queued { .. }));
    assert_eq!(f.queue.len(), 1);
    assert_eq!(f.remote.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_mutate_failure_falls_back_to_queue() {
    let f = fixture();
    f.remote.fail.store(true, Ordering::SeqCst);

    let outcome = f
      .access
      .mutate(Mutation::new(MutationAction::Delete, "/items/9", Value::Null))
      .await;

    match outcome {
      MutationOutcome::Queued { item } => {
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.mutation.endpoint, "/items/9");
      }
      MutationOutcome::Applied => panic!("expected queued outcome"),
    }
    assert_eq!(f.queue.len(), 1);
  }
}
