//! Stored response snapshots and the served-response wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A response snapshot as kept in the cache: status, headers, body.
///
/// Header names are lowercased on construction so lookups are
/// case-insensitive regardless of what the upstream sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
    let headers = headers
      .into_iter()
      .map(|(name, value)| (name.to_lowercase(), value))
      .collect();

    Self {
      status,
      headers,
      body,
    }
  }

  /// Plain-text response with the given status.
  pub fn text(status: u16, body: &str) -> Self {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "text/plain".to_string());

    Self {
      status,
      headers,
      body: body.as_bytes().to_vec(),
    }
  }

  /// The JSON body served when the network is down and no cached entry
  /// exists: `{"error": ..., "offline": true}` with status 503.
  pub fn offline_json(message: &str) -> Self {
    let body = serde_json::json!({
      "error": message,
      "offline": true,
    });

    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    Self {
      status: 503,
      headers,
      body: body.to_string().into_bytes(),
    }
  }

  /// Whether this is a successful (2xx) response. Only successful responses
  /// are ever written to the cache.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  /// The response's `date` header, if present and well-formed (RFC 2822).
  /// Freshness checks treat a missing or unparsable date as stale.
  pub fn date(&self) -> Option<DateTime<Utc>> {
    let value = self.header("date")?;
    DateTime::parse_from_rfc2822(value)
      .ok()
      .map(|date| date.with_timezone(&Utc))
  }

  /// Replace the `date` header. Used when synthesizing entries with a known
  /// age, e.g. in freshness tests.
  pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
    self
      .headers
      .insert("date".to_string(), date.to_rfc2822());
    self
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from the network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale but the network fetch failed
  CacheStale,
  /// Network unavailable, serving whatever the cache had
  Offline,
  /// Synthesized fallback (offline page or error body)
  Fallback,
}

/// A response paired with its source, as handed back to the page.
#[derive(Debug, Clone)]
pub struct ServedResponse {
  pub response: StoredResponse,
  pub source: ResponseSource,
}

impl ServedResponse {
  pub fn network(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn fresh(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::CacheFresh,
    }
  }

  pub fn stale(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::CacheStale,
    }
  }

  pub fn offline(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
    }
  }

  pub fn fallback(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
    }
  }

  /// True if the response was read from the cache rather than the network.
  pub fn from_cache(&self) -> bool {
    matches!(
      self.source,
      ResponseSource::CacheFresh | ResponseSource::CacheStale | ResponseSource::Offline
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "text/css".to_string());
    let response = StoredResponse::new(200, headers, Vec::new());

    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/css"));
  }

  #[test]
  fn test_date_parsing() {
    let now = Utc::now();
    let response = StoredResponse::text(200, "ok").with_date(now);

    let parsed = response.date().unwrap();
    // RFC 2822 has second precision
    assert!((parsed - now).num_seconds().abs() <= 1);
  }

  #[test]
  fn test_missing_date_is_none() {
    let response = StoredResponse::text(200, "ok");
    assert!(response.date().is_none());
  }

  #[test]
  fn test_offline_json_shape() {
    let response = StoredResponse::offline_json("Network unavailable");

    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], serde_json::json!(true));
    assert_eq!(body["error"], serde_json::json!("Network unavailable"));
  }

  #[test]
  fn test_ok_range() {
    assert!(StoredResponse::text(200, "").ok());
    assert!(StoredResponse::text(204, "").ok());
    assert!(!StoredResponse::text(304, "").ok());
    assert!(!StoredResponse::text(503, "").ok());
  }
}
