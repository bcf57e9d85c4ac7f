//! Connectivity signal: current online state plus transition events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::task::BackgroundTask;

/// Shared online/offline flag.
///
/// Cloning is cheap; every clone observes and updates the same state.
/// Subscribers receive a notification only on real transitions.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the state. Returns `true` if this was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
    changed
  }

  /// Receiver that wakes on every transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Periodically probe `url` and flip the state from the outcome.
  ///
  /// Any HTTP response counts as online; connection failures and timeouts
  /// count as offline.
  pub fn spawn_probe(
    &self,
    client: reqwest::Client,
    url: url::Url,
    every: Duration,
  ) -> BackgroundTask {
    let connectivity = self.clone();
    BackgroundTask::spawn("connectivity-probe", move |mut stop| async move {
      let mut interval = tokio::time::interval(every);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = &mut stop => break,
          _ = interval.tick() => {
            let online = match client.head(url.clone()).send().await {
              Ok(_) => true,
              Err(e) => {
                debug!(url = %url, error = %e, "Connectivity probe failed");
                false
              }
            };
            connectivity.set_online(online);
          }
        }
      }
    })
  }
}
