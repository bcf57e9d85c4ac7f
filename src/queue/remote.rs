//! Remote-apply interface and its HTTP implementation.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::MutationAction;
use crate::error::ApplyError;

/// Performs the network write for a queued mutation.
#[async_trait]
pub trait RemoteApply: Send + Sync {
  async fn apply(
    &self,
    endpoint: &str,
    action: MutationAction,
    payload: &Value,
  ) -> Result<(), ApplyError>;
}

/// HTTP client applying mutations as JSON requests against a base URL.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpRemote {
  pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApplyError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, base_url })
  }

  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }

  /// Resolve an endpoint (absolute URL or path) against the base URL.
  pub fn resolve(&self, endpoint: &str) -> Result<Url, ApplyError> {
    self
      .base_url
      .join(endpoint)
      .map_err(|source| ApplyError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
      })
  }
}

#[async_trait]
impl RemoteApply for HttpRemote {
  async fn apply(
    &self,
    endpoint: &str,
    action: MutationAction,
    payload: &Value,
  ) -> Result<(), ApplyError> {
    let url = self.resolve(endpoint)?;
    debug!(%url, %action, "Applying mutation");

    let mut request = self.client.request(action.method(), url);
    if action.has_body() {
      request = request
        .header(CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(payload)?);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApplyError::from_status(status.as_u16(), &body))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn remote() -> HttpRemote {
    HttpRemote::new(
      Url::parse("https://api.example.com/v1/").unwrap(),
      Duration::from_secs(5),
    )
    .unwrap()
  }

  #[test]
  fn test_resolve_relative_endpoint() {
    let url = remote().resolve("supplements/42").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/v1/supplements/42");
  }

  #[test]
  fn test_resolve_absolute_endpoint() {
    let url = remote().resolve("https://other.example.com/x").unwrap();
    assert_eq!(url.host_str(), Some("other.example.com"));
  }

  #[test]
  fn test_resolve_invalid_endpoint() {
    let err = remote().resolve("http://[::1").unwrap_err();
    assert!(matches!(err, ApplyError::InvalidEndpoint { .. }));
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_error() {
    let remote = HttpRemote::new(
      Url::parse("http://127.0.0.1:9/").unwrap(),
      Duration::from_millis(500),
    )
    .unwrap();
    let err = remote
      .apply("items", MutationAction::Delete, &Value::Null)
      .await
      .unwrap_err();
    assert!(matches!(err, ApplyError::Network(_)));
  }
}
