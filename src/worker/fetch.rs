//! Network fetching behind a trait so strategies can be tested offline.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::cache::{RequestKey, StoredResponse};

/// An outgoing request as seen by the worker: method, absolute URL, headers,
/// optional body, plus the two bits of request context the strategies care
/// about (navigation flag, per-request timeout).
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub headers: HashMap<String, String>,
  pub body: Option<Vec<u8>>,
  /// Top-level page navigation, which gets the offline-page fallback.
  pub is_navigation: bool,
  /// Only the form-submission path sets this; cached fetches have none.
  pub timeout: Option<Duration>,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: HashMap::new(),
      body: None,
      is_navigation: false,
      timeout: None,
    }
  }

  /// A GET request flagged as a page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      is_navigation: true,
      ..Self::get(url)
    }
  }

  /// A JSON POST, as used for form submissions.
  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    Self {
      method: "POST".to_string(),
      url,
      headers,
      body: Some(body),
      is_navigation: false,
      timeout: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// The cache key this request normalizes to.
  pub fn cache_key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Trait for performing network fetches.
///
/// An `Err` means the network could not be reached (DNS failure, refused
/// connection, timeout); HTTP error statuses come back as `Ok` responses.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<StoredResponse>>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<StoredResponse>> {
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

      let mut builder = self.client.request(method, request.url.clone());
      for (name, value) in &request.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = request.body {
        builder = builder.body(body);
      }
      if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?
        .to_vec();

      Ok(StoredResponse::new(status, headers, body))
    })
  }
}


#[cfg(test)]
mod tests {
  use super::testing::FakeFetcher;
  use super::*;

  #[tokio::test]
  async fn test_fake_fetcher_records_calls() {
    let fetcher = FakeFetcher::new();
    let url = Url::parse("https://example.com/a.css").unwrap();
    fetcher.respond(url.as_str(), StoredResponse::text(200, "ok"));

    let response = fetcher.fetch(FetchRequest::get(url.clone())).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(fetcher.call_count(url.as_str()), 1);
  }

  #[tokio::test]
  async fn test_fake_fetcher_offline_errors() {
    let fetcher = FakeFetcher::new();
    let url = Url::parse("https://example.com/a.css").unwrap();
    fetcher.respond(url.as_str(), StoredResponse::text(200, "ok"));
    fetcher.set_offline(true);

    assert!(fetcher.fetch(FetchRequest::get(url)).await.is_err());
  }

  #[test]
  fn test_post_json_sets_content_type() {
    let url = Url::parse("https://example.com/api/send_mt103").unwrap();
    let request = FetchRequest::post_json(url, b"{}".to_vec());

    assert_eq!(request.method, "POST");
    assert_eq!(
      request.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
  }
}
