//! Durable, bounded FIFO queue of pending mutations.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::remote::RemoteApply;
use super::types::{DrainReport, Mutation, MutationAction, OfflineQueueItem};
use crate::clock::Clock;
use crate::error::{StoreError, SyncError};
use crate::store::KeyValueStore;

/// Failed attempts after which an item is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Capacity of the dropped-item notification channel.
const DROPPED_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
  pub max_len: usize,
  pub max_retries: u32,
  /// Durable-store key holding the serialized queue
  pub storage_key: String,
}

impl Default for QueueSettings {
  fn default() -> Self {
    Self {
      max_len: 1000,
      max_retries: DEFAULT_MAX_RETRIES,
      storage_key: "offlineQueue".to_string(),
    }
  }
}

/// Resets the drain flag even if the drain future is dropped mid-cycle.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Bounded queue of writes that could not be applied yet.
///
/// Items drain strictly in enqueue order, one remote call at a time. Only one
/// drain runs at once; overlapping calls return immediately.
pub struct OfflineMutationQueue {
  items: Mutex<VecDeque<OfflineQueueItem>>,
  settings: QueueSettings,
  store: Arc<dyn KeyValueStore>,
  remote: Arc<dyn RemoteApply>,
  clock: Arc<dyn Clock>,
  draining: AtomicBool,
  dropped_tx: broadcast::Sender<OfflineQueueItem>,
}

impl OfflineMutationQueue {
  /// Create the queue, restoring any items persisted by a previous process.
  pub fn new(
    settings: QueueSettings,
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteApply>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let items = restore(store.as_ref(), &settings);
    if !items.is_empty() {
      info!(count = items.len(), "Restored offline queue");
    }
    let (dropped_tx, _) = broadcast::channel(DROPPED_CHANNEL_CAPACITY);

    Self {
      items: Mutex::new(items),
      settings,
      store,
      remote,
      clock,
      draining: AtomicBool::new(false),
      dropped_tx,
    }
  }

  fn items(&self) -> MutexGuard<'_, VecDeque<OfflineQueueItem>> {
    self.items.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn settings(&self) -> &QueueSettings {
    &self.settings
  }

  /// Queue a mutation.
  pub fn enqueue(
    &self,
    action: MutationAction,
    payload: Value,
    endpoint: impl Into<String>,
  ) -> OfflineQueueItem {
    self.enqueue_mutation(Mutation::new(action, endpoint, payload))
  }

  /// Queue a mutation, dropping the oldest item if the queue is full.
  pub fn enqueue_mutation(&self, mutation: Mutation) -> OfflineQueueItem {
    let item = OfflineQueueItem {
      id: Uuid::now_v7(),
      mutation,
      enqueued_at: self.clock.now(),
      retry_count: 0,
    };

    {
      let mut items = self.items();
      while items.len() >= self.settings.max_len.max(1) {
        if let Some(evicted) = items.pop_front() {
          warn!(id = %evicted.id, endpoint = %evicted.mutation.endpoint, "Offline queue full, dropping oldest item");
        }
      }
      items.push_back(item.clone());
    }

    debug!(id = %item.id, action = %item.mutation.action, "Queued mutation");
    if let Err(e) = self.persist() {
      warn!(error = %e, "Failed to persist offline queue");
    }
    item
  }

  /// Snapshot of the queued items in enqueue order.
  pub fn snapshot(&self) -> Vec<OfflineQueueItem> {
    self.items().iter().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.items().len()
  }

  pub fn is_empty(&self) -> bool {
    self.items().is_empty()
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::SeqCst)
  }

  /// Receive every item dropped after exhausting its retry budget.
  pub fn subscribe_dropped(&self) -> broadcast::Receiver<OfflineQueueItem> {
    self.dropped_tx.subscribe()
  }

  /// Apply queued mutations in enqueue order.
  ///
  /// Works on a snapshot taken at the start; items enqueued meanwhile wait
  /// for the next cycle. A failed item stays queued with its retry count
  /// bumped until the limit is reached, then it is dropped and announced on
  /// `subscribe_dropped`. Returns `None` if a drain was already running.
  pub async fn drain(&self) -> Option<DrainReport> {
    if self.draining.swap(true, Ordering::SeqCst) {
      debug!("Drain already in progress, skipping");
      return None;
    }
    let _guard = DrainGuard(&self.draining);

    let snapshot = self.snapshot();
    let mut report = DrainReport::default();
    let mut persist_error = None;

    for item in snapshot {
      report.attempted += 1;
      let m = &item.mutation;
      let result = self.remote.apply(&m.endpoint, m.action, &m.payload).await;

      match result {
        Ok(()) => {
          self.items().retain(|i| i.id != item.id);
          debug!(id = %item.id, "Applied queued mutation");
          report.applied.push(item);
        }
        Err(e) => match self.record_failure(item.id) {
          Failure::Retry(count) => {
            warn!(id = %item.id, retry = count, error = %e, "Failed to sync item");
            report.retried += 1;
          }
          Failure::Dropped(dropped) => {
            warn!(
              id = %dropped.id,
              endpoint = %dropped.mutation.endpoint,
              error = %e,
              "Dropping item after exhausting retries"
            );
            // Ignore send errors - nobody may be listening
            let _ = self.dropped_tx.send(dropped.clone());
            report.dropped.push(dropped);
          }
          Failure::Gone => {
            debug!(id = %item.id, "Item left the queue during drain");
          }
        },
      }

      persist_error = self.persist().err();
    }

    report.remaining = self.len();
    report.persist_error = persist_error.map(SyncError::from);
    info!(
      attempted = report.attempted,
      applied = report.applied.len(),
      retried = report.retried,
      dropped = report.dropped.len(),
      remaining = report.remaining,
      "Drain cycle finished"
    );
    Some(report)
  }

  fn record_failure(&self, id: Uuid) -> Failure {
    let mut items = self.items();
    let Some(pos) = items.iter().position(|i| i.id == id) else {
      return Failure::Gone;
    };

    items[pos].retry_count += 1;
    let count = items[pos].retry_count;
    if count >= self.settings.max_retries {
      match items.remove(pos) {
        Some(item) => Failure::Dropped(item),
        None => Failure::Gone,
      }
    } else {
      Failure::Retry(count)
    }
  }

  fn persist(&self) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(&*self.items())?;
    self.store.set(&self.settings.storage_key, &bytes)
  }
}

enum Failure {
  Retry(u32),
  Dropped(OfflineQueueItem),
  Gone,
}

/// Load a persisted queue, keeping the newest `max_len` items.
fn restore(store: &dyn KeyValueStore, settings: &QueueSettings) -> VecDeque<OfflineQueueItem> {
  let bytes = match store.get(&settings.storage_key) {
    Ok(Some(bytes)) => bytes,
    Ok(None) => return VecDeque::new(),
    Err(e) => {
      warn!(error = %e, "Failed to load offline queue");
      return VecDeque::new();
    }
  };

  let mut items: VecDeque<OfflineQueueItem> = match serde_json::from_slice(&bytes) {
    Ok(items) => items,
    Err(e) => {
      warn!(error = %e, "Discarding unreadable offline queue");
      return VecDeque::new();
    }
  };
  while items.len() > settings.max_len {
    items.pop_front();
  }
  items
}
