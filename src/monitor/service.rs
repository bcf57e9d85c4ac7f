//! Operation instrumentation, rolling metrics and cache tuning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::metrics::{compute_stats, PerformanceMetric, PerformanceStats, Recommendation};
use super::optimizer::{optimize, AlertThresholds, OptimizationConfig, OptimizationPlan};
use crate::cache::{CacheStats, CacheStatus, CacheStore};
use crate::clock::Clock;
use crate::error::{ConfigError, StoreError};
use crate::store::KeyValueStore;
use crate::task::BackgroundTask;

pub const METRICS_STORAGE_KEY: &str = "performanceMetrics";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
  /// Period of the background analysis
  pub interval: Duration,
  /// Warn on every operation slower than the response-time threshold
  pub detailed_logging: bool,
  /// Apply the optimizer's plan after each periodic analysis
  pub auto_tune: bool,
  /// Metrics kept in memory
  pub capacity: usize,
  /// Most recent metrics used for stats, and the number persisted
  pub window: usize,
  /// Stats are withheld below this many metrics
  pub min_samples: usize,
}

impl Default for MonitorSettings {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(30),
      detailed_logging: true,
      auto_tune: false,
      capacity: 1000,
      window: 100,
      min_samples: 10,
    }
  }
}

/// Result of `apply_optimizations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedOptimization {
  pub applied: bool,
  pub changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceExport {
  pub exported_at: DateTime<Utc>,
  pub config: OptimizationConfig,
  pub stats: Option<PerformanceStats>,
  pub metrics: Vec<PerformanceMetric>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePerformanceReport {
  pub generated_at: DateTime<Utc>,
  pub cache: CacheStats,
  pub performance: Option<PerformanceStats>,
  pub recommendations: Vec<Recommendation>,
}

/// Wraps data operations to record latency, outcome and cache usage, and
/// turns the recorded window into stats and cache tuning.
pub struct PerformanceMonitor {
  cache: Arc<CacheStore>,
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  settings: MonitorSettings,
  metrics: Mutex<VecDeque<PerformanceMetric>>,
  config: Mutex<OptimizationConfig>,
  last_stats: Mutex<Option<PerformanceStats>>,
  task: Mutex<Option<BackgroundTask>>,
}

impl PerformanceMonitor {
  pub fn new(
    cache: Arc<CacheStore>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    thresholds: AlertThresholds,
  ) -> Self {
    let config = OptimizationConfig::from_cache(cache.settings(), thresholds);
    let metrics = restore(store.as_ref(), settings.capacity.max(1));

    Self {
      cache,
      store,
      clock,
      settings,
      metrics: Mutex::new(metrics),
      config: Mutex::new(config),
      last_stats: Mutex::new(None),
      task: Mutex::new(None),
    }
  }

  /// Run `run`, record one metric for it and hand its result back unchanged.
  ///
  /// With a `cache_key`, the call counts as a cache hit when that key holds
  /// a servable entry before `run` starts.
  pub async fn execute<T, E, F, Fut>(
    &self,
    operation: &str,
    cache_key: Option<&str>,
    run: F,
  ) -> Result<T, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Serialize,
    E: Display,
  {
    let cache_hit = cache_key.is_some_and(|key| {
      matches!(
        self.cache.status(key),
        CacheStatus::Fresh | CacheStatus::Stale
      )
    });

    let started = Instant::now();
    let result = run().await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (payload_size_bytes, error_message) = match &result {
      Ok(value) => (serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0), None),
      Err(e) => (0, Some(e.to_string())),
    };

    let threshold = self.config().thresholds.response_time_ms;
    if self.settings.detailed_logging && duration_ms > threshold {
      warn!(operation, duration_ms, threshold_ms = threshold, "Slow operation");
    }

    self.record(PerformanceMetric {
      timestamp: self.clock.now(),
      operation: operation.to_string(),
      duration_ms,
      success: result.is_ok(),
      cache_hit,
      payload_size_bytes,
      error_message,
    });

    result
  }

  /// Append a metric, dropping the oldest beyond capacity.
  pub fn record(&self, metric: PerformanceMetric) {
    let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
    metrics.push_back(metric);
    while metrics.len() > self.settings.capacity.max(1) {
      metrics.pop_front();
    }
  }

  /// Stats over the most recent window, or `None` below the sample floor.
  pub fn performance_stats(&self) -> Option<PerformanceStats> {
    let window = self.recent_metrics(self.settings.window);
    if window.len() < self.settings.min_samples {
      return None;
    }
    compute_stats(
      &window,
      self.cache.stats().usage_percent(),
      &self.config().thresholds,
    )
  }

  /// Stats computed by the last periodic analysis.
  pub fn last_stats(&self) -> Option<PerformanceStats> {
    self
      .last_stats
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  /// Up to `limit` most recent metrics, oldest first.
  pub fn recent_metrics(&self, limit: usize) -> Vec<PerformanceMetric> {
    let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
    let skip = metrics.len().saturating_sub(limit);
    metrics.iter().skip(skip).cloned().collect()
  }

  pub fn export_performance_data(&self) -> PerformanceExport {
    PerformanceExport {
      exported_at: self.clock.now(),
      config: self.config(),
      stats: self.performance_stats(),
      metrics: self.recent_metrics(usize::MAX),
    }
  }

  /// Forget every metric, in memory and on disk.
  pub fn clear_performance_data(&self) {
    self
      .metrics
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clear();
    *self.last_stats.lock().unwrap_or_else(|e| e.into_inner()) = None;
    if let Err(e) = self.store.remove(METRICS_STORAGE_KEY) {
      warn!(error = %e, "Failed to remove persisted metrics");
    }
    info!("Performance data cleared");
  }

  pub fn config(&self) -> OptimizationConfig {
    *self.config.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Replace the configuration and push its limits into the cache.
  pub fn update_config(&self, config: OptimizationConfig) -> Result<(), ConfigError> {
    config.validate()?;
    *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    self.cache.apply_settings(config.cache_settings());
    info!(
      ttl_ms = config.ttl_ms,
      max_cache_bytes = config.max_cache_bytes,
      "Monitor configuration updated"
    );
    Ok(())
  }

  /// Propose a configuration from current stats. Without enough data the
  /// plan keeps the current configuration.
  pub fn optimize_cache_settings(&self) -> OptimizationPlan {
    let current = self.config();
    match self.performance_stats() {
      Some(stats) => optimize(&current, &stats),
      None => OptimizationPlan {
        config: current,
        reasoning: vec!["Not enough data to optimize".to_string()],
      },
    }
  }

  /// Adopt the optimizer's plan. When the size limit shrinks the cache is
  /// cleared so the new limit starts from empty.
  pub fn apply_optimizations(&self) -> AppliedOptimization {
    let plan = self.optimize_cache_settings();
    let previous = self.config();

    if plan.config == previous {
      return AppliedOptimization {
        applied: false,
        changes: Vec::new(),
      };
    }

    if let Err(e) = self.update_config(plan.config) {
      warn!(error = %e, "Rejected optimization plan");
      return AppliedOptimization {
        applied: false,
        changes: Vec::new(),
      };
    }

    let mut changes = plan.reasoning;
    if plan.config.max_cache_bytes < previous.max_cache_bytes {
      self.cache.clear();
      changes.push("Cleared cache after lowering its size limit".to_string());
    }
    for change in &changes {
      info!(change = %change, "Applied optimization");
    }

    AppliedOptimization {
      applied: true,
      changes,
    }
  }

  pub fn cache_performance_report(&self) -> CachePerformanceReport {
    let performance = self.performance_stats();
    let recommendations = performance
      .as_ref()
      .map(|s| s.recommendations.clone())
      .unwrap_or_default();

    CachePerformanceReport {
      generated_at: self.clock.now(),
      cache: self.cache.stats(),
      performance,
      recommendations,
    }
  }

  /// One analysis pass: compute stats, log advice, persist the window and
  /// auto-tune when enabled.
  pub fn analyze(&self) -> Option<PerformanceStats> {
    self.persist();

    let stats = self.performance_stats()?;
    for rec in &stats.recommendations {
      info!(recommendation = %rec, "Performance recommendation");
    }
    *self.last_stats.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats.clone());

    if self.settings.auto_tune {
      self.apply_optimizations();
    }
    Some(stats)
  }

  /// Run `analyze` every `interval` until `shutdown`.
  pub fn start(self: &Arc<Self>) {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    if task.as_ref().is_some_and(BackgroundTask::is_running) {
      return;
    }

    let monitor: Weak<Self> = Arc::downgrade(self);
    let period = self.settings.interval.max(Duration::from_millis(1));
    *task = Some(BackgroundTask::spawn("performance-monitor", move |mut stop| async move {
      let mut timer = interval_at(tokio::time::Instant::now() + period, period);
      timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = &mut stop => break,
          _ = timer.tick() => {
            let Some(monitor) = monitor.upgrade() else { break };
            monitor.analyze();
          }
        }
      }
      debug!("Performance monitor stopped");
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

  /// Stop periodic analysis and persist the current window.
  pub async fn shutdown(&self) {
    let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(mut task) = task {
      task.shutdown().await;
    }
    self.persist();
  }

  fn persist(&self) {
    let window = self.recent_metrics(self.settings.window);
    let result = serde_json::to_vec(&window)
      .map_err(StoreError::from)
      .and_then(|bytes| self.store.set(METRICS_STORAGE_KEY, &bytes));
    if let Err(e) = result {
      warn!(error = %e, "Failed to persist metrics");
    }
  }
}

fn restore(store: &dyn KeyValueStore, capacity: usize) -> VecDeque<PerformanceMetric> {
  let bytes = match store.get(METRICS_STORAGE_KEY) {
    Ok(Some(bytes)) => bytes,
    Ok(None) => return VecDeque::new(),
    Err(e) => {
      warn!(error = %e, "Failed to read persisted metrics");
      return VecDeque::new();
    }
  };

  match serde_json::from_slice::<Vec<PerformanceMetric>>(&bytes) {
    Ok(metrics) => {
      let skip = metrics.len().saturating_sub(capacity);
      metrics.into_iter().skip(skip).collect()
    }
    Err(e) => {
      warn!(error = %e, "Discarding unreadable metrics");
      VecDeque::new()
    }
  }
}
