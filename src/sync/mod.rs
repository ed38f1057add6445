//! Background sync: deferred retries triggered by connectivity restoration.
//!
//! Two tags are recognized. `mt103-transfer` drains the submission queue in
//! FIFO order; `background-sync` refreshes every entry of the static
//! generation in place. Queued submissions are retried on every trigger with
//! no backoff and no retry cap — a submission that keeps failing stays
//! queued until it eventually succeeds or is removed by hand.

mod queue;

pub use queue::{MemoryQueue, QueueStore, QueuedSubmission, SqliteQueue};

use color_eyre::Result;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStore, RequestKey};
use crate::worker::fetch::{FetchRequest, Fetcher};

/// Sync tag fired when connectivity returns and queued transfers should be
/// resubmitted.
pub const TRANSFER_SYNC_TAG: &str = "mt103-transfer";

/// Sync tag for refreshing the static generation in the background.
pub const CACHE_REFRESH_TAG: &str = "background-sync";

/// Outcome of one queue drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub remaining: usize,
}

/// Outcome of one static refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
  pub refreshed: usize,
  pub failed: usize,
}

/// Resubmit every queued payload to the endpoint, FIFO.
///
/// A 2xx response removes the submission; anything else leaves it queued
/// for the next trigger and the drain moves on to the next entry.
pub async fn drain_queue<Q: QueueStore, F: Fetcher>(
  queue: &Q,
  fetcher: &F,
  endpoint: &Url,
) -> Result<DrainReport> {
  let pending = queue.pending()?;
  let attempted = pending.len();
  let mut delivered = 0;

  for submission in pending {
    let request = FetchRequest::post_json(endpoint.clone(), submission.payload.clone());

    match fetcher.fetch(request).await {
      Ok(response) if response.ok() => {
        queue.remove(submission.id)?;
        delivered += 1;
        info!(id = submission.id, "queued transfer submitted");
      }
      Ok(response) => {
        warn!(
          id = submission.id,
          status = response.status,
          "upstream rejected queued transfer, leaving it queued"
        );
      }
      Err(error) => {
        warn!(id = submission.id, %error, "failed to submit queued transfer");
      }
    }
  }

  Ok(DrainReport {
    attempted,
    delivered,
    remaining: queue.len()?,
  })
}

/// Refetch every URL cached in a generation, overwriting entries whose
/// refetch succeeded and leaving the rest in place.
pub async fn refresh_generation<S: CacheStore, F: Fetcher>(
  store: &S,
  fetcher: &F,
  generation: &str,
) -> Result<RefreshReport> {
  let mut refreshed = 0;
  let mut failed = 0;

  for url in store.urls(generation)? {
    let parsed = match Url::parse(&url) {
      Ok(parsed) => parsed,
      Err(error) => {
        warn!(%url, %error, "skipping malformed cached url");
        failed += 1;
        continue;
      }
    };

    match fetcher.fetch(FetchRequest::get(parsed.clone())).await {
      Ok(response) if response.ok() => {
        store.put(generation, &RequestKey::get(&parsed), &response)?;
        refreshed += 1;
      }
      Ok(response) => {
        warn!(%url, status = response.status, "refresh fetch rejected");
        failed += 1;
      }
      Err(error) => {
        warn!(%url, %error, "failed to refresh cached entry");
        failed += 1;
      }
    }
  }

  info!(generation, refreshed, failed, "background refresh complete");

  Ok(RefreshReport { refreshed, failed })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, StoredResponse};
  use crate::worker::fetch::testing::FakeFetcher;

  fn endpoint() -> Url {
    Url::parse("https://example.com/api/send_mt103").unwrap()
  }

  #[tokio::test]
  async fn test_drain_removes_delivered_submissions() {
    let queue = MemoryQueue::new();
    let fetcher = FakeFetcher::new();
    fetcher.respond(endpoint().as_str(), StoredResponse::text(200, "{}"));

    queue.enqueue(b"{\"amount\": 1}").unwrap();
    queue.enqueue(b"{\"amount\": 2}").unwrap();

    let report = drain_queue(&queue, &fetcher, &endpoint()).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(fetcher.call_count(endpoint().as_str()), 2);
  }

  #[tokio::test]
  async fn test_drain_keeps_failed_submissions_queued() {
    let queue = MemoryQueue::new();
    let fetcher = FakeFetcher::new();
    fetcher.set_offline(true);

    queue.enqueue(b"{\"amount\": 1}").unwrap();

    let report = drain_queue(&queue, &fetcher, &endpoint()).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);

    // Connectivity returns; the next trigger delivers it
    fetcher.set_offline(false);
    fetcher.respond(endpoint().as_str(), StoredResponse::text(200, "{}"));

    let report = drain_queue(&queue, &fetcher, &endpoint()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
  }

  #[tokio::test]
  async fn test_drain_keeps_rejected_submissions_queued() {
    let queue = MemoryQueue::new();
    let fetcher = FakeFetcher::new();
    fetcher.respond(endpoint().as_str(), StoredResponse::text(400, "{\"error\":\"bad\"}"));

    queue.enqueue(b"{}").unwrap();

    let report = drain_queue(&queue, &fetcher, &endpoint()).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
  }

  #[tokio::test]
  async fn test_refresh_overwrites_entries_and_skips_failures() {
    let store = MemoryStore::new();
    let fetcher = FakeFetcher::new();
    let generation = "mt103-static-v1";

    let a = Url::parse("https://example.com/a.css").unwrap();
    let b = Url::parse("https://example.com/b.js").unwrap();
    store
      .put(generation, &RequestKey::get(&a), &StoredResponse::text(200, "old a"))
      .unwrap();
    store
      .put(generation, &RequestKey::get(&b), &StoredResponse::text(200, "old b"))
      .unwrap();

    // a refreshes, b now 500s upstream
    fetcher.respond(a.as_str(), StoredResponse::text(200, "new a"));
    fetcher.respond(b.as_str(), StoredResponse::text(500, "boom"));

    let report = refresh_generation(&store, &fetcher, generation).await.unwrap();

    assert_eq!(report.refreshed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(
      store
        .get(generation, &RequestKey::get(&a))
        .unwrap()
        .unwrap()
        .body_text(),
      "new a"
    );
    assert_eq!(
      store
        .get(generation, &RequestKey::get(&b))
        .unwrap()
        .unwrap()
        .body_text(),
      "old b"
    );
  }
}
