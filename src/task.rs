//! Owned background task with explicit shutdown.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// A spawned loop that stops when `shutdown` is called or the handle is dropped.
///
/// The closure receives a `oneshot::Receiver` that resolves on shutdown (or
/// errors once the sender is dropped); loops select on it next to their timers.
pub struct BackgroundTask {
  name: &'static str,
  stop: Option<oneshot::Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
  pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
  where
    F: FnOnce(oneshot::Receiver<()>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(run(rx));
    Self {
      name,
      stop: Some(tx),
      handle: Some(handle),
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .handle
      .as_ref()
      .map(|h| !h.is_finished())
      .unwrap_or(false)
  }

  /// Signal the loop to stop and wait for it to finish.
  pub async fn shutdown(&mut self) {
    if let Some(stop) = self.stop.take() {
      // Ignore send errors - the loop may already have exited
      let _ = stop.send(());
    }
    if let Some(handle) = self.handle.take() {
      if let Err(e) = handle.await {
        warn!(task = self.name, error = %e, "Background task ended abnormally");
      }
    }
  }
}
