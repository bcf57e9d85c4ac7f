//! Metric records, aggregated statistics and the recommendation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::optimizer::AlertThresholds;

/// Hit rate (percent) under which a longer TTL is recommended.
pub const LOW_HIT_RATE_PERCENT: f64 = 60.0;

/// Number of slowest operations kept in `PerformanceStats`.
pub const TOP_SLOW_OPERATIONS: usize = 5;

/// One instrumented call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
  pub timestamp: DateTime<Utc>,
  pub operation: String,
  pub duration_ms: f64,
  pub success: bool,
  pub cache_hit: bool,
  pub payload_size_bytes: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
}

/// Average latency of one operation category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
  pub operation: String,
  pub average_ms: f64,
  pub count: usize,
}

/// Aggregate over a window of metrics. Always derived, never stored as truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
  pub total_operations: usize,
  pub average_response_time_ms: f64,
  /// Percent of calls served from a fresh cache entry
  pub cache_hit_rate: f64,
  /// Percent of calls that failed
  pub error_rate: f64,
  /// Cache occupancy in percent of its byte limit
  pub memory_usage_percent: f64,
  /// Slowest categories by average duration, slowest first
  pub top_slow_operations: Vec<OperationSummary>,
  pub recommendations: Vec<Recommendation>,
}

/// Tuning advice derived from `PerformanceStats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
  RaiseTtl { hit_rate: f64 },
  ShrinkCache { memory_usage_percent: f64 },
  SlowOperation { operation: String, average_ms: f64 },
  InvestigateFailures { error_rate: f64 },
}

impl fmt::Display for Recommendation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Recommendation::RaiseTtl { hit_rate } => write!(
        f,
        "Cache hit rate is {:.1}%: raise the cache TTL or cache more query shapes",
        hit_rate
      ),
      Recommendation::ShrinkCache {
        memory_usage_percent,
      } => write!(
        f,
        "Cache is {:.1}% full: lower the maximum cache size",
        memory_usage_percent
      ),
      Recommendation::SlowOperation {
        operation,
        average_ms,
      } => write!(
        f,
        "Operation {} is slow ({:.0}ms on average)",
        operation, average_ms
      ),
      Recommendation::InvestigateFailures { error_rate } => write!(
        f,
        "Error rate is {:.1}%: investigate failing operations",
        error_rate
      ),
    }
  }
}

/// Aggregate `metrics`. Returns `None` for an empty window.
pub fn compute_stats(
  metrics: &[PerformanceMetric],
  memory_usage_percent: f64,
  thresholds: &AlertThresholds,
) -> Option<PerformanceStats> {
  if metrics.is_empty() {
    return None;
  }

  let total = metrics.len() as f64;
  let failures = metrics.iter().filter(|m| !m.success).count() as f64;
  let hits = metrics.iter().filter(|m| m.cache_hit).count() as f64;
  let total_ms: f64 = metrics.iter().map(|m| m.duration_ms).sum();

  let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
  for m in metrics {
    let group = groups.entry(m.operation.as_str()).or_insert((0.0, 0));
    group.0 += m.duration_ms;
    group.1 += 1;
  }

  let mut by_latency: Vec<OperationSummary> = groups
    .into_iter()
    .map(|(operation, (sum, count))| OperationSummary {
      operation: operation.to_string(),
      average_ms: sum / count as f64,
      count,
    })
    .collect();
  // Stable sort keeps name order for equal averages
  by_latency.sort_by(|a, b| b.average_ms.total_cmp(&a.average_ms));
  by_latency.truncate(TOP_SLOW_OPERATIONS);

  let mut stats = PerformanceStats {
    total_operations: metrics.len(),
    average_response_time_ms: total_ms / total,
    cache_hit_rate: hits / total * 100.0,
    error_rate: failures / total * 100.0,
    memory_usage_percent,
    top_slow_operations: by_latency,
    recommendations: Vec::new(),
  };
  stats.recommendations = recommendations(&stats, thresholds);
  Some(stats)
}

/// Rules mapping stats to advice. Pure; ignores `stats.recommendations`.
pub fn recommendations(
  stats: &PerformanceStats,
  thresholds: &AlertThresholds,
) -> Vec<Recommendation> {
  let mut out = Vec::new();

  if stats.cache_hit_rate < LOW_HIT_RATE_PERCENT {
    out.push(Recommendation::RaiseTtl {
      hit_rate: stats.cache_hit_rate,
    });
  }

  if stats.memory_usage_percent > thresholds.memory_usage_percent {
    out.push(Recommendation::ShrinkCache {
      memory_usage_percent: stats.memory_usage_percent,
    });
  }

  for op in &stats.top_slow_operations {
    if op.average_ms > thresholds.response_time_ms {
      out.push(Recommendation::SlowOperation {
        operation: op.operation.clone(),
        average_ms: op.average_ms,
      });
    }
  }

  if stats.error_rate > thresholds.error_rate_percent {
    out.push(Recommendation::InvestigateFailures {
      error_rate: stats.error_rate,
    });
  }

  out
}
