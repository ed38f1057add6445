//! Install and activation: pre-population, generation GC, takeover.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{error, info};
use url::Url;

use crate::cache::{CacheStore, Generations, RequestKey, StoredResponse};

use super::fetch::{FetchRequest, Fetcher};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Initial state
  Parsed,
  /// Install in progress
  Installing,
  /// Installed, not yet controlling
  Installed,
  /// Activation in progress
  Activating,
  /// Active and controlling pages
  Activated,
  /// Install failed; this worker will never control anything
  Redundant,
}

/// Tracks lifecycle state and performs the install/activate transitions.
pub struct Lifecycle {
  state: Mutex<WorkerState>,
  skip_waiting_calls: AtomicUsize,
  controlling: AtomicBool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(WorkerState::Parsed),
      skip_waiting_calls: AtomicUsize::new(0),
      controlling: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// Number of times immediate takeover was requested.
  pub fn skip_waiting_count(&self) -> usize {
    self.skip_waiting_calls.load(Ordering::SeqCst)
  }

  /// Request immediate activation instead of waiting for old clients.
  pub fn skip_waiting(&self) {
    self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
  }

  /// Whether activation has claimed the open pages.
  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::SeqCst)
  }

  /// Pre-populate the static generation with every listed asset.
  ///
  /// All-or-nothing: the assets are fetched concurrently and written only
  /// once every fetch came back successful. Any failure aborts the install
  /// and marks this worker redundant; previously active generations are
  /// untouched.
  pub async fn install<S: CacheStore, F: Fetcher>(
    &self,
    store: &S,
    fetcher: &F,
    generations: &Generations,
    assets: &[Url],
  ) -> Result<usize> {
    self.set_state(WorkerState::Installing);
    info!(generation = %generations.static_name, assets = assets.len(), "installing");

    store.open(&generations.static_name)?;

    let fetches = assets.iter().map(|url| async move {
      let response = fetcher.fetch(FetchRequest::get(url.clone())).await?;
      if !response.ok() {
        return Err(eyre!(
          "Pre-cache fetch for {} returned status {}",
          url,
          response.status
        ));
      }
      Ok::<(&Url, StoredResponse), color_eyre::Report>((url, response))
    });

    let responses = match try_join_all(fetches).await {
      Ok(responses) => responses,
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        error!(%e, "install failed");
        return Err(e);
      }
    };

    for (url, response) in &responses {
      store.put(&generations.static_name, &RequestKey::get(url), response)?;
    }

    self.set_state(WorkerState::Installed);
    info!(cached = responses.len(), "install complete");

    Ok(responses.len())
  }

  /// Delete every generation of ours that is not current, then take
  /// control of all open pages immediately.
  pub fn activate<S: CacheStore>(
    &self,
    store: &S,
    generations: &Generations,
  ) -> Result<Vec<String>> {
    self.set_state(WorkerState::Activating);

    let mut deleted = Vec::new();
    for name in store.generations()? {
      if generations.is_ours(&name) && !generations.is_current(&name) {
        info!(generation = %name, "deleting stale cache generation");
        if store.delete_generation(&name)? {
          deleted.push(name);
        }
      }
    }

    self.set_state(WorkerState::Activated);
    self.controlling.store(true, Ordering::SeqCst);
    info!("activated, claiming clients");

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::worker::fetch::testing::FakeFetcher;

  fn asset_urls(paths: &[&str]) -> Vec<Url> {
    paths
      .iter()
      .map(|p| Url::parse("https://example.com").unwrap().join(p).unwrap())
      .collect()
  }

  #[tokio::test]
  async fn test_install_caches_every_asset() {
    let store = MemoryStore::new();
    let fetcher = FakeFetcher::new();
    let generations = Generations::for_version("v1");
    let assets = asset_urls(&["/", "/a.css", "/b.js"]);

    for url in &assets {
      fetcher.respond(url.as_str(), StoredResponse::text(200, "asset"));
    }

    let lifecycle = Lifecycle::new();
    let cached = lifecycle
      .install(&store, &fetcher, &generations, &assets)
      .await
      .unwrap();

    assert_eq!(cached, 3);
    assert_eq!(store.entry_count("mt103-static-v1").unwrap(), 3);
    assert_eq!(lifecycle.state(), WorkerState::Installed);

    for url in &assets {
      assert!(store
        .get("mt103-static-v1", &RequestKey::get(url))
        .unwrap()
        .is_some());
    }
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let store = MemoryStore::new();
    let fetcher = FakeFetcher::new();
    let generations = Generations::for_version("v1");
    let assets = asset_urls(&["/", "/a.css", "/b.js"]);

    fetcher.respond("https://example.com/", StoredResponse::text(200, "index"));
    fetcher.respond("https://example.com/a.css", StoredResponse::text(200, "css"));
    fetcher.respond(
      "https://example.com/b.js",
      StoredResponse::text(404, "not found"),
    );

    let lifecycle = Lifecycle::new();
    let result = lifecycle
      .install(&store, &fetcher, &generations, &assets)
      .await;

    assert!(result.is_err());
    assert_eq!(store.entry_count("mt103-static-v1").unwrap(), 0);
    assert_eq!(lifecycle.state(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_install_network_failure_aborts() {
    let store = MemoryStore::new();
    let fetcher = FakeFetcher::new();
    fetcher.set_offline(true);
    let generations = Generations::for_version("v1");

    let lifecycle = Lifecycle::new();
    let result = lifecycle
      .install(&store, &fetcher, &generations, &asset_urls(&["/"]))
      .await;

    assert!(result.is_err());
    assert_eq!(store.entry_count("mt103-static-v1").unwrap(), 0);
  }

  #[test]
  fn test_activate_deletes_only_stale_generations_of_ours() {
    let store = MemoryStore::new();
    let generations = Generations::for_version("v2");

    for name in [
      "mt103-static-v1",
      "mt103-dynamic-v1",
      "mt103-static-v2",
      "mt103-dynamic-v2",
      "other-app-cache",
    ] {
      store.open(name).unwrap();
    }

    let lifecycle = Lifecycle::new();
    let deleted = lifecycle.activate(&store, &generations).unwrap();

    assert_eq!(
      deleted,
      vec!["mt103-dynamic-v1".to_string(), "mt103-static-v1".to_string()]
    );
    assert_eq!(
      store.generations().unwrap(),
      vec![
        "mt103-dynamic-v2".to_string(),
        "mt103-static-v2".to_string(),
        "other-app-cache".to_string()
      ]
    );
    assert_eq!(lifecycle.state(), WorkerState::Activated);
    assert!(lifecycle.is_controlling());
  }

  #[test]
  fn test_skip_waiting_counts_invocations() {
    let lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.skip_waiting_count(), 0);

    lifecycle.skip_waiting();
    assert_eq!(lifecycle.skip_waiting_count(), 1);
  }
}
