//! Normalized request descriptors used as cache keys.

use sha2::{Digest, Sha256};
use url::Url;

/// A normalized request descriptor: uppercase method plus absolute URL with
/// the fragment stripped. Two requests that differ only in fragment map to
/// the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);

    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  /// Key for a GET request, the only method the cache stores.
  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Human-readable canonical form, used directly by in-memory backends.
  pub fn canonical(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// Stable fixed-length key for storage backends.
  pub fn storage_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fragment_is_stripped() {
    let a = RequestKey::get(&Url::parse("https://example.com/a.css#top").unwrap());
    let b = RequestKey::get(&Url::parse("https://example.com/a.css").unwrap());

    assert_eq!(a, b);
    assert_eq!(a.storage_hash(), b.storage_hash());
  }

  #[test]
  fn test_query_is_preserved() {
    let a = RequestKey::get(&Url::parse("https://example.com/a?x=1").unwrap());
    let b = RequestKey::get(&Url::parse("https://example.com/a?x=2").unwrap());

    assert_ne!(a, b);
  }

  #[test]
  fn test_method_is_uppercased() {
    let url = Url::parse("https://example.com/").unwrap();
    let key = RequestKey::new("get", &url);

    assert_eq!(key.method(), "GET");
    assert_eq!(key.canonical(), "GET https://example.com/");
  }
}
