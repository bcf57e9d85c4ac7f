//! Drives the offline queue from connectivity transitions and a periodic timer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connectivity::Connectivity;
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::queue::{DrainReport, OfflineMutationQueue};
use crate::task::BackgroundTask;

/// Sync state surfaced to consumers. Only the coordinator writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
  pub is_online: bool,
  pub last_sync_at: Option<DateTime<Utc>>,
  pub pending_count: usize,
  /// Held for the duration of a drain cycle
  pub is_syncing: bool,
  /// Error raised by the last cycle as a whole, cleared when a new cycle starts
  pub last_error: Option<String>,
}

struct Shared {
  queue: Arc<OfflineMutationQueue>,
  cache: Option<Arc<CacheStore>>,
  connectivity: Connectivity,
  clock: Arc<dyn Clock>,
  status: watch::Sender<SyncStatus>,
}

impl Shared {
  async fn on_connectivity(&self, online: bool) {
    self.status.send_modify(|s| {
      s.is_online = online;
      if online {
        s.last_error = None;
      }
    });
    if online {
      self.run_cycle().await;
    }
  }

  async fn on_tick(&self) {
    if self.connectivity.is_online() && !self.queue.is_empty() {
      debug!(pending = self.queue.len(), "Periodic sync");
      self.run_cycle().await;
    }
  }

  /// One guarded drain. Returns `None` when offline or already syncing.
  async fn run_cycle(&self) -> Option<DrainReport> {
    if !self.connectivity.is_online() {
      return None;
    }

    let acquired = self.status.send_if_modified(|s| {
      if s.is_syncing {
        false
      } else {
        s.is_syncing = true;
        s.last_error = None;
        true
      }
    });
    if !acquired {
      debug!("Sync already running, skipping");
      return None;
    }
    let guard = SyncingGuard(&self.status);

    let report = self.queue.drain().await;

    if let (Some(report), Some(cache)) = (&report, &self.cache) {
      for key in report
        .applied
        .iter()
        .flat_map(|item| item.mutation.invalidates.iter())
      {
        cache.invalidate(key);
      }
    }

    let now = self.clock.now();
    let pending = self.queue.len();
    self.status.send_modify(|s| {
      s.is_syncing = false;
      s.pending_count = pending;
      if let Some(report) = &report {
        s.last_sync_at = Some(now);
        if let Some(e) = &report.persist_error {
          warn!(error = %e, "Sync cycle failed");
          s.last_error = Some(e.to_string());
        }
      }
    });
    drop(guard);

    report
  }
}

/// Clears `is_syncing` if a cycle is dropped before it finishes.
struct SyncingGuard<'a>(&'a watch::Sender<SyncStatus>);

impl Drop for SyncingGuard<'_> {
  fn drop(&mut self) {
    self.0.send_if_modified(|s| std::mem::replace(&mut s.is_syncing, false));
  }
}

/// Replays the offline queue whenever connectivity returns, and every
/// `interval` while online with work pending.
///
/// Owns its background loop: call `start` to attach to the connectivity
/// signal and timer, and `shutdown` to detach both.
pub struct SyncCoordinator {
  shared: Arc<Shared>,
  interval: Duration,
  task: Mutex<Option<BackgroundTask>>,
}

impl SyncCoordinator {
  pub fn new(
    queue: Arc<OfflineMutationQueue>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
    interval: Duration,
  ) -> Self {
    let (status, _) = watch::channel(SyncStatus {
      is_online: connectivity.is_online(),
      last_sync_at: None,
      pending_count: queue.len(),
      is_syncing: false,
      last_error: None,
    });

    Self {
      shared: Arc::new(Shared {
        queue,
        cache: None,
        connectivity,
        clock,
        status,
      }),
      interval: interval.max(Duration::from_millis(1)),
      task: Mutex::new(None),
    }
  }

  /// Invalidate each applied item's cache keys in `cache`.
  ///
  /// Must be called before `start`.
  pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
    if let Some(shared) = Arc::get_mut(&mut self.shared) {
      shared.cache = Some(cache);
    } else {
      warn!("Coordinator already started, cache invalidation not attached");
    }
    self
  }

  /// Attach to connectivity transitions and start the periodic timer.
  /// Calling `start` on a running coordinator does nothing.
  pub fn start(&self) {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    if task.as_ref().is_some_and(BackgroundTask::is_running) {
      return;
    }

    let shared = self.shared.clone();
    let period = self.interval;
    // Subscribe before spawning: a new receiver treats the current value as seen
    let mut connectivity_rx = shared.connectivity.subscribe();
    *task = Some(BackgroundTask::spawn("sync-coordinator", move |mut stop| async move {
      let mut timer = interval_at(Instant::now() + period, period);
      timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
      info!(interval_ms = period.as_millis() as u64, "Sync coordinator started");

      if shared.connectivity.is_online() && !shared.queue.is_empty() {
        debug!(pending = shared.queue.len(), "Draining work left from before start");
        shared.run_cycle().await;
      }

      loop {
        tokio::select! {
          _ = &mut stop => break,
          changed = connectivity_rx.changed() => {
            if changed.is_err() {
              break;
            }
            let online = *connectivity_rx.borrow_and_update();
            shared.on_connectivity(online).await;
          }
          _ = timer.tick() => shared.on_tick().await,
        }
      }

      info!("Sync coordinator stopped");
    }));
  }

  pub fn is_running(&self) -> bool {
    self
      .task
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .as_ref()
      .is_some_and(BackgroundTask::is_running)
  }

  /// Drain now if online and no cycle is running.
  pub async fn sync_now(&self) -> Option<DrainReport> {
    self.shared.run_cycle().await
  }

  /// Current status with live queue length and connectivity.
  pub fn status(&self) -> SyncStatus {
    let mut status = self.shared.status.borrow().clone();
    status.pending_count = self.shared.queue.len();
    status.is_online = self.shared.connectivity.is_online();
    status
  }

  /// Receiver notified whenever the coordinator updates its status.
  pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
    self.shared.status.subscribe()
  }

  /// Cancel the timer and detach from connectivity. A cycle in flight is
  /// allowed to finish first.
  pub async fn shutdown(&self) {
    let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(mut task) = task {
      task.shutdown().await;
    }
  }
}
