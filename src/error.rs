//! Error types shared across the data layer.
//!
//! Cache reads and writes never surface these to their callers; they are
//! logged and the layer degrades to memory-only operation. Queue and sync
//! operations use them to drive retry bookkeeping and `SyncStatus.last_error`.

use thiserror::Error;

/// Durable-tier failure.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Serialization error: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Lock poisoned: {0}")]
  Lock(String),
}

/// A single remote apply attempt failed. Every variant is retryable.
#[derive(Error, Debug)]
pub enum ApplyError {
  #[error("Network error: {0}")]
  Network(#[from] reqwest::Error),

  #[error("Remote rejected mutation with status {code}: {body}")]
  Status { code: u16, body: String },

  #[error("Invalid endpoint '{endpoint}': {source}")]
  InvalidEndpoint {
    endpoint: String,
    #[source]
    source: url::ParseError,
  },

  #[error("Failed to encode payload: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Maximum length for response bodies carried in `ApplyError::Status`.
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApplyError {
  pub fn from_status(code: u16, body: &str) -> Self {
    let body = if body.len() <= MAX_ERROR_BODY_LENGTH {
      body.to_string()
    } else {
      let mut end = MAX_ERROR_BODY_LENGTH;
      while !body.is_char_boundary(end) {
        end -= 1;
      }
      format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    };
    ApplyError::Status { code, body }
  }
}

/// Optimizer produced a configuration that cannot be applied.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("TTL must be positive, got {0}ms")]
  NonPositiveTtl(i64),

  #[error("TTL of {0}ms exceeds the {max}s limit", max = crate::cache::MAX_TTL_SECS)]
  TtlTooLong(i64),

  #[error("Max cache bytes must be positive")]
  ZeroCapacity,

  #[error("Threshold '{name}' out of range: {value}")]
  ThresholdOutOfRange { name: &'static str, value: f64 },
}

/// A drain cycle that raised as a whole (per-item failures are retried instead).
#[derive(Error, Debug)]
pub enum SyncError {
  #[error("Failed to persist offline queue: {0}")]
  Persist(#[from] StoreError),
}
