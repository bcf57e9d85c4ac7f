use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::facade::DataAccess;
use crate::monitor::PerformanceMonitor;
use crate::queue::{HttpRemote, OfflineMutationQueue};
use crate::store::{KeyValueStore, NoopStore, SqliteStore};
use crate::sync::{Connectivity, SyncCoordinator};
use crate::task::BackgroundTask;

/// Fully wired data layer: one shared durable store, clock and connectivity
/// signal behind the cache, queue, coordinator and monitor.
pub struct App {
  config: Config,
  connectivity: Connectivity,
  remote: Arc<HttpRemote>,
  queue: Arc<OfflineMutationQueue>,
  coordinator: SyncCoordinator,
  access: DataAccess,
  probe: Option<BackgroundTask>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    if !config.storage.persist {
      return Self::with_store(config, Arc::new(NoopStore));
    }

    let path = config.database_path()?;
    let store = SqliteStore::open(&path)
      .map_err(|e| eyre!("Failed to open store {}: {}", path.display(), e))?;
    Self::with_store(config, Arc::new(store))
  }

  pub fn with_store(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
    config.validate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    // Without a probe there is nothing to say otherwise
    let connectivity = Connectivity::new(true);

    let remote = Arc::new(
      HttpRemote::new(config.base_url()?, config.remote_timeout())
        .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?,
    );

    let cache = Arc::new(CacheStore::new(
      config.cache.namespace.clone(),
      config.cache_settings(),
      store.clone(),
      clock.clone(),
      connectivity.clone(),
    ));

    let queue = Arc::new(OfflineMutationQueue::new(
      config.queue_settings(),
      store.clone(),
      remote.clone(),
      clock.clone(),
    ));

    let coordinator = SyncCoordinator::new(
      queue.clone(),
      connectivity.clone(),
      clock.clone(),
      config.sync_interval(),
    )
    .with_cache(cache.clone());

    let monitor = Arc::new(PerformanceMonitor::new(
      cache.clone(),
      store,
      clock,
      config.monitor_settings(),
      config.monitor.thresholds,
    ));

    let access = DataAccess::new(
      cache,
      queue.clone(),
      remote.clone(),
      monitor,
      connectivity.clone(),
    );

    Ok(Self {
      config,
      connectivity,
      remote,
      queue,
      coordinator,
      access,
      probe: None,
    })
  }

  pub fn queue(&self) -> &Arc<OfflineMutationQueue> {
    &self.queue
  }

  pub fn coordinator(&self) -> &SyncCoordinator {
    &self.coordinator
  }

  pub fn access(&self) -> &DataAccess {
    &self.access
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  /// Start the connectivity probe (if configured), the sync coordinator and
  /// periodic performance analysis.
  pub fn start(&mut self) -> Result<()> {
    if let Some(url) = self.config.probe_url()? {
      let every = std::time::Duration::from_secs(self.config.sync.probe_interval_secs.max(1));
      self.probe = Some(
        self
          .connectivity
          .spawn_probe(self.remote.client().clone(), url, every),
      );
    }

    self.coordinator.start();
    self.access.monitor().start();
    info!(
      namespace = %self.config.cache.namespace,
      pending = self.queue.len(),
      "Data layer started"
    );
    Ok(())
  }

  /// Run until ctrl-c, then shut everything down.
  pub async fn run(&mut self) -> Result<()> {
    self.start()?;
    tokio::signal::ctrl_c()
      .await
      .map_err(|e| eyre!("Failed to wait for ctrl-c: {}", e))?;
    self.shutdown().await;
    Ok(())
  }

  /// Stop background work. In-flight cycles finish first.
  pub async fn shutdown(&mut self) {
    if let Some(mut probe) = self.probe.take() {
      probe.shutdown().await;
    }
    futures::future::join(
      self.coordinator.shutdown(),
      self.access.monitor().shutdown(),
    )
    .await;
    info!("Data layer stopped");
  }
}
