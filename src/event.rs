//! Worker events and the connectivity-driven sync trigger.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use url::Url;

use crate::cache::ServedResponse;
use crate::sync::TRANSFER_SYNC_TAG;
use crate::worker::fetch::FetchRequest;

/// Everything the host can hand to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Pre-populate the static generation
  Install,
  /// Garbage-collect stale generations and take over
  Activate,
  /// An intercepted request; the strategy's answer goes back over `reply`
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<color_eyre::Result<ServedResponse>>,
  },
  /// A message-channel command, with an optional reply channel
  Message {
    command: serde_json::Value,
    reply: Option<oneshot::Sender<serde_json::Value>>,
  },
  /// A sync trigger for the given tag
  Sync { tag: String },
}

/// How long one connectivity probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Watches the upstream health endpoint and emits a `Sync` event whenever
/// connectivity comes (back) up.
///
/// The probe loop runs on its own task; `next()` yields events as they
/// happen. A transition from offline to online fires exactly one trigger,
/// staying online fires none.
pub struct SyncTrigger {
  rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl SyncTrigger {
  pub fn new(health_url: Url, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
          error!(%e, "failed to build connectivity probe client");
          return;
        }
      };

      let mut online = false;
      let mut ticker = tokio::time::interval(interval);

      loop {
        ticker.tick().await;

        let reachable = client
          .get(health_url.clone())
          .send()
          .await
          .map(|response| response.status().is_success())
          .unwrap_or(false);

        if reachable && !online {
          info!("connectivity restored, triggering sync");
          let event = WorkerEvent::Sync {
            tag: TRANSFER_SYNC_TAG.to_string(),
          };
          if tx.send(event).is_err() {
            break;
          }
        }
        online = reachable;
      }
    });

    Self { rx }
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<WorkerEvent> {
    self.rx.recv().await
  }
}
