//! Caching strategies: the fallback chains behind each route.

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::cache::{CacheStore, Generations, RequestKey, ServedResponse, StoredResponse};

use super::fetch::{FetchRequest, Fetcher};

/// Runs the per-route fallback chains against one store and one fetcher.
///
/// Every chain performs its read -> fetch -> write steps as independent
/// single-key operations; two concurrent requests for the same URL may both
/// fetch and both write, and the last write wins.
pub struct StrategyEngine<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generations: Generations,
  offline_page: Url,
}

impl<S: CacheStore, F: Fetcher> StrategyEngine<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generations: Generations, offline_page: Url) -> Self {
    Self {
      store,
      fetcher,
      generations,
      offline_page,
    }
  }

  /// Cache-First, for static assets: serve the cached entry when present,
  /// otherwise fetch and populate. With the network down and nothing
  /// cached, fall back to the offline page, then to a synthesized 503.
  pub async fn cache_first(&self, request: &FetchRequest) -> Result<ServedResponse> {
    let key = request.cache_key();

    if let Some(cached) = self.store.get(&self.generations.static_name, &key)? {
      return Ok(ServedResponse::fresh(cached));
    }

    match self.fetcher.fetch(request.clone()).await {
      Ok(response) => {
        if response.ok() {
          self
            .store
            .put(&self.generations.static_name, &key, &response)?;
        }
        Ok(ServedResponse::network(response))
      }
      Err(error) => {
        warn!(url = %request.url, %error, "static asset fetch failed");

        if let Some(page) = self.cached_offline_page()? {
          return Ok(ServedResponse::fallback(page));
        }
        Ok(ServedResponse::fallback(StoredResponse::text(503, "Offline")))
      }
    }
  }

  /// Network-First, for API and other dynamic requests: live response when
  /// reachable (written through to the dynamic generation), cached entry
  /// when not, structured JSON error when neither exists.
  pub async fn network_first(&self, request: &FetchRequest) -> Result<ServedResponse> {
    let key = request.cache_key();

    match self.fetcher.fetch(request.clone()).await {
      Ok(response) => {
        if response.ok() {
          self
            .store
            .put(&self.generations.dynamic_name, &key, &response)?;
        }
        Ok(ServedResponse::network(response))
      }
      Err(error) => {
        warn!(url = %request.url, %error, "network failed, trying cache");

        if let Some(cached) = self.store.get(&self.generations.dynamic_name, &key)? {
          return Ok(ServedResponse::offline(cached));
        }

        Ok(ServedResponse::fallback(StoredResponse::offline_json(
          "Network unavailable and no cached data available",
        )))
      }
    }
  }

  /// Runtime caching with a freshness check, for fonts and images: a cached
  /// entry younger than `max_age` (by its `date` header) is served without
  /// touching the network; anything older is refetched, serving the stale
  /// entry only if the refetch fails.
  pub async fn runtime_fresh(
    &self,
    request: &FetchRequest,
    max_age: Duration,
  ) -> Result<ServedResponse> {
    let key = request.cache_key();
    let cached = self.store.get(&self.generations.dynamic_name, &key)?;

    if let Some(ref response) = cached {
      if is_fresh(response, max_age) {
        return Ok(ServedResponse::fresh(response.clone()));
      }
    }

    match self.fetcher.fetch(request.clone()).await {
      Ok(response) => {
        if response.ok() {
          self
            .store
            .put(&self.generations.dynamic_name, &key, &response)?;
        }
        Ok(ServedResponse::network(response))
      }
      Err(error) => match cached {
        Some(stale) => {
          warn!(url = %request.url, %error, "refetch failed, serving stale entry");
          Ok(ServedResponse::stale(stale))
        }
        None => Err(error),
      },
    }
  }

  /// Default handling for everything unclassified: plain network fetch,
  /// with the offline page (or a synthesized 503) for failed navigations.
  pub async fn network_default(&self, request: &FetchRequest) -> Result<ServedResponse> {
    match self.fetcher.fetch(request.clone()).await {
      Ok(response) => Ok(ServedResponse::network(response)),
      Err(error) => {
        if !request.is_navigation {
          return Err(error);
        }

        warn!(url = %request.url, %error, "navigation failed while offline");

        if let Some(page) = self.cached_offline_page()? {
          return Ok(ServedResponse::fallback(page));
        }
        Ok(ServedResponse::fallback(StoredResponse::text(
          503,
          "You are offline",
        )))
      }
    }
  }

  /// Non-intercepted requests (non-GET, non-HTTP): forwarded untouched.
  pub async fn passthrough(&self, request: &FetchRequest) -> Result<ServedResponse> {
    let response = self.fetcher.fetch(request.clone()).await?;
    Ok(ServedResponse::network(response))
  }

  fn cached_offline_page(&self) -> Result<Option<StoredResponse>> {
    let key = RequestKey::get(&self.offline_page);
    self.store.get(&self.generations.static_name, &key)
  }
}

fn is_fresh(response: &StoredResponse, max_age: Duration) -> bool {
  match response.date() {
    Some(date) => Utc::now() - date < max_age,
    // No usable date header: treat as stale
    None => false,
  }
}
