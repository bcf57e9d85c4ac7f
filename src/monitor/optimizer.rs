//! Tunable cache configuration and the heuristic that revises it.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::metrics::PerformanceStats;
use crate::cache::{CacheSettings, MAX_TTL_SECS};
use crate::error::ConfigError;

const MAX_TTL_MS: i64 = 30 * 60 * 1000;
const MIN_TTL_MS: i64 = 60 * 1000;
const MIN_CACHE_BYTES: usize = 10 * 1024 * 1024;

/// Hit rate (percent) under which the TTL is doubled.
const RAISE_TTL_BELOW: f64 = 50.0;
/// Hit rate (percent) over which the TTL is shortened.
const SHORTEN_TTL_ABOVE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
  pub response_time_ms: f64,
  pub error_rate_percent: f64,
  pub memory_usage_percent: f64,
}

impl Default for AlertThresholds {
  fn default() -> Self {
    Self {
      response_time_ms: 1000.0,
      error_rate_percent: 5.0,
      memory_usage_percent: 80.0,
    }
  }
}

/// Cache limits plus alert thresholds. Changed only by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptimizationConfig {
  pub ttl_ms: i64,
  pub max_cache_bytes: usize,
  pub thresholds: AlertThresholds,
}

impl OptimizationConfig {
  pub fn from_cache(settings: CacheSettings, thresholds: AlertThresholds) -> Self {
    Self {
      ttl_ms: settings.default_ttl.num_milliseconds(),
      max_cache_bytes: settings.max_bytes,
      thresholds,
    }
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      default_ttl: Duration::milliseconds(self.ttl_ms),
      max_bytes: self.max_cache_bytes,
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.ttl_ms <= 0 {
      return Err(ConfigError::NonPositiveTtl(self.ttl_ms));
    }
    if self.ttl_ms / 1000 > MAX_TTL_SECS {
      return Err(ConfigError::TtlTooLong(self.ttl_ms));
    }
    if self.max_cache_bytes == 0 {
      return Err(ConfigError::ZeroCapacity);
    }

    let t = &self.thresholds;
    let checks = [
      ("response_time_ms", t.response_time_ms, f64::MAX),
      ("error_rate_percent", t.error_rate_percent, 100.0),
      ("memory_usage_percent", t.memory_usage_percent, 100.0),
    ];
    for (name, value, max) in checks {
      if !value.is_finite() || value < 0.0 || value > max {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
      }
    }
    Ok(())
  }
}

impl Default for OptimizationConfig {
  fn default() -> Self {
    Self::from_cache(CacheSettings::default(), AlertThresholds::default())
  }
}

/// Proposed configuration with a human-readable reason per change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationPlan {
  pub config: OptimizationConfig,
  pub reasoning: Vec<String>,
}

/// Map stats to a revised configuration.
///
/// - hit rate under 50%: double the TTL, capped at 30 minutes
/// - hit rate over 90%: cut the TTL by 20%, floored at 1 minute
/// - memory usage over the alert threshold: cut the size limit by 20%,
///   floored at 10 MiB
pub fn optimize(current: &OptimizationConfig, stats: &PerformanceStats) -> OptimizationPlan {
  let mut config = *current;
  let mut reasoning = Vec::new();

  if stats.cache_hit_rate < RAISE_TTL_BELOW {
    config.ttl_ms = current.ttl_ms.saturating_mul(2).min(MAX_TTL_MS);
    reasoning.push(format!(
      "Low cache hit rate ({:.1}%): raising TTL to {}ms",
      stats.cache_hit_rate, config.ttl_ms
    ));
  } else if stats.cache_hit_rate > SHORTEN_TTL_ABOVE {
    config.ttl_ms = (current.ttl_ms * 4 / 5).max(MIN_TTL_MS);
    reasoning.push(format!(
      "High cache hit rate ({:.1}%): lowering TTL to {}ms",
      stats.cache_hit_rate, config.ttl_ms
    ));
  }

  if stats.memory_usage_percent > current.thresholds.memory_usage_percent {
    config.max_cache_bytes = (current.max_cache_bytes / 5 * 4).max(MIN_CACHE_BYTES);
    reasoning.push(format!(
      "High memory usage ({:.1}%): lowering cache size to {} bytes",
      stats.memory_usage_percent, config.max_cache_bytes
    ));
  }

  OptimizationPlan { config, reasoning }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stats(cache_hit_rate: f64, memory_usage_percent: f64) -> PerformanceStats {
    PerformanceStats {
      total_operations: 100,
      average_response_time_ms: 10.0,
      cache_hit_rate,
      error_rate: 0.0,
      memory_usage_percent,
      top_slow_operations: Vec::new(),
      recommendations: Vec::new(),
    }
  }

  #[test]
  fn test_low_hit_rate_doubles_ttl_with_cap() {
    let current = OptimizationConfig::default();
    let plan = optimize(&current, &stats(40.0, 10.0));
    assert_eq!(plan.config.ttl_ms, 600_000);
    assert_eq!(plan.reasoning.len(), 1);

    let long = OptimizationConfig {
      ttl_ms: 20 * 60 * 1000,
      ..current
    };
    assert_eq!(optimize(&long, &stats(40.0, 10.0)).config.ttl_ms, MAX_TTL_MS);
  }

  #[test]
  fn test_high_hit_rate_shortens_ttl_with_floor() {
    let current = OptimizationConfig::default();
    assert_eq!(optimize(&current, &stats(95.0, 10.0)).config.ttl_ms, 240_000);

    let short = OptimizationConfig {
      ttl_ms: 70_000,
      ..current
    };
    assert_eq!(optimize(&short, &stats(95.0, 10.0)).config.ttl_ms, MIN_TTL_MS);
  }

  #[test]
  fn test_middle_hit_rate_keeps_ttl() {
    let current = OptimizationConfig::default();
    let plan = optimize(&current, &stats(70.0, 10.0));
    assert_eq!(plan.config, current);
    assert!(plan.reasoning.is_empty());
  }

  #[test]
  fn test_memory_pressure_shrinks_cache_with_floor() {
    let current = OptimizationConfig::default();
    let plan = optimize(&current, &stats(70.0, 85.0));
    assert_eq!(plan.config.max_cache_bytes, 40 * 1024 * 1024);

    let small = OptimizationConfig {
      max_cache_bytes: 11 * 1024 * 1024,
      ..current
    };
    assert_eq!(
      optimize(&small, &stats(70.0, 85.0)).config.max_cache_bytes,
      MIN_CACHE_BYTES
    );
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let good = OptimizationConfig::default();
    assert_eq!(good.validate(), Ok(()));

    let zero_ttl = OptimizationConfig { ttl_ms: 0, ..good };
    assert_eq!(zero_ttl.validate(), Err(ConfigError::NonPositiveTtl(0)));

    let forever = OptimizationConfig {
      ttl_ms: i64::MAX,
      ..good
    };
    assert_eq!(forever.validate(), Err(ConfigError::TtlTooLong(i64::MAX)));

    let no_room = OptimizationConfig {
      max_cache_bytes: 0,
      ..good
    };
    assert_eq!(no_room.validate(), Err(ConfigError::ZeroCapacity));

    let bad_threshold = OptimizationConfig {
      thresholds: AlertThresholds {
        error_rate_percent: 150.0,
        ..AlertThresholds::default()
      },
      ..good
    };
    assert!(matches!(
      bad_threshold.validate(),
      Err(ConfigError::ThresholdOutOfRange {
        name: "error_rate_percent",
        ..
      })
    ));
  }

  #[test]
  fn test_cache_settings_round_trip() {
    let config = OptimizationConfig::default();
    assert_eq!(config.cache_settings(), CacheSettings::default());
  }
}
