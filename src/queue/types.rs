//! Queue item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;

/// Kind of write a queued mutation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
  Create,
  Update,
  Delete,
}

impl MutationAction {
  /// HTTP method used to apply this action remotely.
  pub fn method(&self) -> reqwest::Method {
    match self {
      MutationAction::Create => reqwest::Method::POST,
      MutationAction::Update => reqwest::Method::PUT,
      MutationAction::Delete => reqwest::Method::DELETE,
    }
  }

  /// Deletes carry no body.
  pub fn has_body(&self) -> bool {
    !matches!(self, MutationAction::Delete)
  }
}

impl fmt::Display for MutationAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MutationAction::Create => write!(f, "create"),
      MutationAction::Update => write!(f, "update"),
      MutationAction::Delete => write!(f, "delete"),
    }
  }
}

impl FromStr for MutationAction {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "create" => Ok(MutationAction::Create),
      "update" => Ok(MutationAction::Update),
      "delete" => Ok(MutationAction::Delete),
      other => Err(format!(
        "unknown action '{}', expected create, update or delete",
        other
      )),
    }
  }
}

/// A write waiting to be applied remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
  pub action: MutationAction,
  pub endpoint: String,
  pub payload: Value,
  /// Cache keys to invalidate once the mutation has been applied
  #[serde(default)]
  pub invalidates: Vec<String>,
}

impl Mutation {
  pub fn new(action: MutationAction, endpoint: impl Into<String>, payload: Value) -> Self {
    Self {
      action,
      endpoint: endpoint.into(),
      payload,
      invalidates: Vec::new(),
    }
  }

  pub fn invalidates(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.invalidates = keys.into_iter().map(Into::into).collect();
    self
  }
}

/// A queued mutation plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
  pub id: Uuid,
  #[serde(flatten)]
  pub mutation: Mutation,
  pub enqueued_at: DateTime<Utc>,
  /// Failed attempts so far, never above the queue's retry limit
  pub retry_count: u32,
}

/// Outcome of one drain cycle.
#[derive(Debug, Default)]
pub struct DrainReport {
  pub attempted: usize,
  /// Items applied remotely and removed, in apply order
  pub applied: Vec<OfflineQueueItem>,
  /// Items that failed but stay queued for the next cycle
  pub retried: usize,
  /// Items removed after exhausting their retry budget
  pub dropped: Vec<OfflineQueueItem>,
  /// Queue length when the cycle finished
  pub remaining: usize,
  /// Set when the queue could not be persisted after the cycle
  pub persist_error: Option<SyncError>,
}
