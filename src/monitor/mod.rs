//! Performance monitoring for data operations.
//!
//! Every wrapped call yields a `PerformanceMetric`. Stats are always derived
//! from the recent window, and the optimizer turns them into new cache limits.

mod metrics;
mod optimizer;
mod service;

pub use metrics::{
  compute_stats, recommendations, OperationSummary, PerformanceMetric, PerformanceStats,
  Recommendation,
};
pub use optimizer::{optimize, AlertThresholds, OptimizationConfig, OptimizationPlan};
pub use service::{
  AppliedOptimization, CachePerformanceReport, MonitorSettings, PerformanceExport,
  PerformanceMonitor, METRICS_STORAGE_KEY,
};
