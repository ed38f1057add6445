//! The worker: lifecycle, routing, strategies, messages, sync triggers.
//!
//! `Worker` owns the cache store, the network fetcher, and the sync queue,
//! and exposes one handler per event kind. `dispatch` routes a
//! [`WorkerEvent`](crate::event::WorkerEvent) to the matching handler, so a
//! host drives the whole worker through a single entry point.

pub mod fetch;
mod lifecycle;
mod router;
mod strategy;

pub use lifecycle::{Lifecycle, WorkerState};
pub use router::{Pattern, Route, RouteRule, Router, RuleStrategy, DEFAULT_MAX_AGE_SECS, ROUTE_RULES};
pub use strategy::StrategyEngine;

use color_eyre::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStore, Generations, ServedResponse};
use crate::event::WorkerEvent;
use crate::sync::{self, DrainReport, QueueStore, RefreshReport};
use crate::transfer::TransferClient;

use fetch::{FetchRequest, Fetcher};

/// Commands accepted over the message channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(rename = "CLEAR_CACHE")]
  ClearCache,
  #[serde(rename = "GET_CACHE_INFO")]
  GetCacheInfo,
  #[serde(rename = "PERFORMANCE_METRICS")]
  PerformanceMetrics {
    #[serde(default)]
    metrics: serde_json::Value,
  },
}

/// What a sync trigger ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Drained(DrainReport),
  Refreshed(RefreshReport),
  /// Unknown tag, logged and skipped
  Ignored,
}

/// The worker itself: store + fetcher + queue plus the configuration that
/// was fixed at build time (generation names, asset list, endpoints).
pub struct Worker<S: CacheStore, F: Fetcher, Q: QueueStore> {
  store: Arc<S>,
  fetcher: Arc<F>,
  queue: Arc<Q>,
  engine: StrategyEngine<S, F>,
  router: Router,
  generations: Generations,
  assets: Vec<Url>,
  submit_endpoint: Url,
  lifecycle: Lifecycle,
}

impl<S: CacheStore, F: Fetcher, Q: QueueStore> Worker<S, F, Q> {
  pub fn new(
    store: S,
    fetcher: F,
    queue: Q,
    generations: Generations,
    assets: Vec<Url>,
    offline_page: Url,
    submit_endpoint: Url,
  ) -> Self {
    let store = Arc::new(store);
    let fetcher = Arc::new(fetcher);
    let router = Router::new(&assets);
    let engine = StrategyEngine::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      generations.clone(),
      offline_page,
    );

    Self {
      store,
      fetcher,
      queue: Arc::new(queue),
      engine,
      router,
      generations,
      assets,
      submit_endpoint,
      lifecycle: Lifecycle::new(),
    }
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  /// A submission client sharing this worker's fetcher and queue.
  pub fn transfer_client(&self) -> TransferClient<F, Q> {
    TransferClient::new(
      Arc::clone(&self.fetcher),
      Arc::clone(&self.queue),
      self.submit_endpoint.clone(),
    )
  }

  /// Route one event to its handler.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<()> {
    match event {
      WorkerEvent::Install => self.on_install().await.map(|_| ()),
      WorkerEvent::Activate => self.on_activate().map(|_| ()),
      WorkerEvent::Fetch { request, reply } => {
        let result = self.handle_fetch(&request).await;
        if reply.send(result).is_err() {
          warn!("fetch reply receiver dropped");
        }
        Ok(())
      }
      WorkerEvent::Message { command, reply } => self.on_message(command, reply),
      WorkerEvent::Sync { tag } => self.on_sync(&tag).await.map(|_| ()),
    }
  }

  /// Install: pre-cache the asset list, then take over immediately.
  pub async fn on_install(&self) -> Result<usize> {
    let cached = self
      .lifecycle
      .install(&*self.store, &*self.fetcher, &self.generations, &self.assets)
      .await?;

    // Successful install activates right away instead of waiting for old
    // clients to go away.
    self.lifecycle.skip_waiting();
    self.on_activate()?;

    Ok(cached)
  }

  /// Activate: drop stale generations, claim the open pages.
  pub fn on_activate(&self) -> Result<Vec<String>> {
    self.lifecycle.activate(&*self.store, &self.generations)
  }

  /// Answer one intercepted request via the routed strategy.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<ServedResponse> {
    match self.router.classify(request) {
      Route::Passthrough => self.engine.passthrough(request).await,
      Route::CacheFirst => self.engine.cache_first(request).await,
      Route::NetworkFirst => self.engine.network_first(request).await,
      Route::Runtime { max_age_secs } => {
        self
          .engine
          .runtime_fresh(request, chrono::Duration::seconds(max_age_secs))
          .await
      }
      Route::Default => self.engine.network_default(request).await,
    }
  }

  /// Handle a message-channel command. Unknown commands are logged and
  /// dropped, never errors.
  pub fn on_message(
    &self,
    command: serde_json::Value,
    reply: Option<oneshot::Sender<serde_json::Value>>,
  ) -> Result<()> {
    let message = match serde_json::from_value::<Message>(command.clone()) {
      Ok(message) => message,
      Err(_) => {
        let kind = command["type"].as_str().unwrap_or("<missing>");
        warn!(message_type = kind, "ignoring unknown message");
        return Ok(());
      }
    };

    match message {
      Message::SkipWaiting => {
        self.lifecycle.skip_waiting();
        self.on_activate()?;
      }
      Message::ClearCache => {
        let dropped = self.clear_cache()?;
        info!(dropped, "cache cleared");
      }
      Message::GetCacheInfo => {
        let info = self.cache_info()?;
        let body = serde_json::to_value(&info)?;
        match reply {
          Some(reply) => {
            if reply.send(body).is_err() {
              warn!("cache info receiver dropped");
            }
          }
          None => warn!("cache info requested without a reply channel"),
        }
      }
      Message::PerformanceMetrics { metrics } => {
        info!(%metrics, "performance metrics received");
      }
    }

    Ok(())
  }

  /// Handle a sync trigger by tag.
  pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome> {
    match tag {
      sync::TRANSFER_SYNC_TAG => {
        let report =
          sync::drain_queue(&*self.queue, &*self.fetcher, &self.submit_endpoint).await?;
        info!(
          delivered = report.delivered,
          remaining = report.remaining,
          "transfer queue drained"
        );
        Ok(SyncOutcome::Drained(report))
      }
      sync::CACHE_REFRESH_TAG => {
        let report = sync::refresh_generation(
          &*self.store,
          &*self.fetcher,
          &self.generations.static_name,
        )
        .await?;
        Ok(SyncOutcome::Refreshed(report))
      }
      _ => {
        warn!(tag, "ignoring unknown sync tag");
        Ok(SyncOutcome::Ignored)
      }
    }
  }

  /// Entry counts per generation, sorted by name.
  pub fn cache_info(&self) -> Result<BTreeMap<String, usize>> {
    let mut info = BTreeMap::new();
    for name in self.store.generations()? {
      let count = self.store.entry_count(&name)?;
      info.insert(name, count);
    }
    Ok(info)
  }

  /// Drop every generation, ours or not. Returns how many were dropped.
  pub fn clear_cache(&self) -> Result<usize> {
    let mut dropped = 0;
    for name in self.store.generations()? {
      if self.store.delete_generation(&name)? {
        dropped += 1;
      }
    }
    Ok(dropped)
  }
}

#[cfg(test)]
mod tests {
  use super::fetch::testing::FakeFetcher;
  use super::*;
  use crate::cache::{MemoryStore, RequestKey, ResponseSource, StoredResponse};
  use crate::sync::MemoryQueue;

  fn base() -> Url {
    Url::parse("https://example.com").unwrap()
  }

  fn worker_with(
    store: MemoryStore,
    fetcher: FakeFetcher,
    asset_paths: &[&str],
  ) -> Worker<MemoryStore, FakeFetcher, MemoryQueue> {
    let assets = asset_paths
      .iter()
      .map(|p| base().join(p).unwrap())
      .collect();

    Worker::new(
      store,
      fetcher,
      MemoryQueue::new(),
      Generations::for_version("v1"),
      assets,
      base().join("/offline.html").unwrap(),
      base().join("/api/send_mt103").unwrap(),
    )
  }

  #[tokio::test]
  async fn test_install_precaches_and_takes_over_once() {
    let fetcher = FakeFetcher::new();
    for path in ["/", "/a.css", "/b.js"] {
      fetcher.respond(
        base().join(path).unwrap().as_str(),
        StoredResponse::text(200, "asset"),
      );
    }

    let worker = worker_with(MemoryStore::new(), fetcher, &["/", "/a.css", "/b.js"]);
    let cached = worker.on_install().await.unwrap();

    assert_eq!(cached, 3);
    assert_eq!(worker.lifecycle().skip_waiting_count(), 1);
    assert_eq!(worker.lifecycle().state(), WorkerState::Activated);
    assert!(worker.lifecycle().is_controlling());
    assert_eq!(worker.cache_info().unwrap()["mt103-static-v1"], 3);
  }

  #[tokio::test]
  async fn test_failed_install_leaves_previous_generations() {
    let store = MemoryStore::new();
    store.open("mt103-static-v0").unwrap();

    let fetcher = FakeFetcher::new();
    fetcher.set_offline(true);

    let worker = worker_with(store, fetcher, &["/"]);
    assert!(worker.on_install().await.is_err());

    assert_eq!(worker.lifecycle().state(), WorkerState::Redundant);
    assert_eq!(worker.lifecycle().skip_waiting_count(), 0);
    // No activation ran, so the old generation survived
    assert!(worker
      .cache_info()
      .unwrap()
      .contains_key("mt103-static-v0"));
  }

  #[tokio::test]
  async fn test_lifecycle_events_through_dispatch() {
    let fetcher = FakeFetcher::new();
    fetcher.respond(base().join("/").unwrap().as_str(), StoredResponse::text(200, "index"));

    let store = MemoryStore::new();
    store.open("mt103-static-v0").unwrap();

    let worker = worker_with(store, fetcher, &["/"]);
    worker.dispatch(WorkerEvent::Install).await.unwrap();
    worker.dispatch(WorkerEvent::Activate).await.unwrap();

    assert_eq!(worker.lifecycle().state(), WorkerState::Activated);
    // The stale generation went away during activation
    assert!(!worker.cache_info().unwrap().contains_key("mt103-static-v0"));
  }

  #[tokio::test]
  async fn test_fetch_dispatch_api_offline_with_cache() {
    let store = MemoryStore::new();
    let url = base().join("/api/rates").unwrap();
    store
      .put(
        "mt103-dynamic-v1",
        &RequestKey::get(&url),
        &StoredResponse::text(200, "cached rates"),
      )
      .unwrap();

    let fetcher = FakeFetcher::new();
    fetcher.set_offline(true);

    let worker = worker_with(store, fetcher, &["/"]);
    let (tx, rx) = oneshot::channel();
    worker
      .dispatch(WorkerEvent::Fetch {
        request: FetchRequest::get(url),
        reply: tx,
      })
      .await
      .unwrap();

    let served = rx.await.unwrap().unwrap();
    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.body_text(), "cached rates");
  }

  #[tokio::test]
  async fn test_skip_waiting_message_activates() {
    let worker = worker_with(MemoryStore::new(), FakeFetcher::new(), &["/"]);

    worker
      .on_message(serde_json::json!({"type": "SKIP_WAITING"}), None)
      .unwrap();

    assert_eq!(worker.lifecycle().skip_waiting_count(), 1);
    assert_eq!(worker.lifecycle().state(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_clear_cache_message_drops_everything() {
    let store = MemoryStore::new();
    store.open("mt103-static-v1").unwrap();
    store.open("some-other-cache").unwrap();

    let worker = worker_with(store, FakeFetcher::new(), &["/"]);
    worker
      .on_message(serde_json::json!({"type": "CLEAR_CACHE"}), None)
      .unwrap();

    assert!(worker.cache_info().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_info_message_replies_with_counts() {
    let store = MemoryStore::new();
    store
      .put(
        "mt103-static-v1",
        &RequestKey::get(&base().join("/a.css").unwrap()),
        &StoredResponse::text(200, "css"),
      )
      .unwrap();

    let worker = worker_with(store, FakeFetcher::new(), &["/"]);
    let (tx, rx) = oneshot::channel();
    worker
      .dispatch(WorkerEvent::Message {
        command: serde_json::json!({"type": "GET_CACHE_INFO"}),
        reply: Some(tx),
      })
      .await
      .unwrap();

    let info = rx.await.unwrap();
    assert_eq!(info["mt103-static-v1"], serde_json::json!(1));
  }

  #[tokio::test]
  async fn test_unknown_message_is_ignored() {
    let worker = worker_with(MemoryStore::new(), FakeFetcher::new(), &["/"]);

    worker
      .on_message(serde_json::json!({"type": "SELF_DESTRUCT"}), None)
      .unwrap();
    worker.on_message(serde_json::json!({"no": "type"}), None).unwrap();

    assert_eq!(worker.lifecycle().state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_is_ignored() {
    let worker = worker_with(MemoryStore::new(), FakeFetcher::new(), &["/"]);

    let outcome = worker.on_sync("nightly-report").await.unwrap();
    assert_eq!(outcome, SyncOutcome::Ignored);
  }

  #[tokio::test]
  async fn test_transfer_sync_drains_shared_queue() {
    let fetcher = FakeFetcher::new();
    fetcher.respond(
      base().join("/api/send_mt103").unwrap().as_str(),
      StoredResponse::text(200, "{}"),
    );

    let worker = worker_with(MemoryStore::new(), fetcher, &["/"]);
    worker.queue.enqueue(b"{\"amount\": 1}").unwrap();

    let outcome = worker.on_sync(sync::TRANSFER_SYNC_TAG).await.unwrap();
    match outcome {
      SyncOutcome::Drained(report) => {
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
      }
      other => panic!("expected Drained, got {:?}", other),
    }
  }
}
