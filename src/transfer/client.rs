//! Submission client: POST with timeout, queue on network failure.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::sync::QueueStore;
use crate::worker::fetch::{FetchRequest, Fetcher};

use super::types::{SubmitOutcome, TransferAck, TransferRequest};

/// How long a live submission may take before it is treated as a network
/// failure and parked in the queue.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends transfers to the upstream endpoint, falling back to the sync queue
/// when the network is unreachable.
pub struct TransferClient<F: Fetcher, Q: QueueStore> {
  fetcher: Arc<F>,
  queue: Arc<Q>,
  endpoint: Url,
}

impl<F: Fetcher, Q: QueueStore> TransferClient<F, Q> {
  pub fn new(fetcher: Arc<F>, queue: Arc<Q>, endpoint: Url) -> Self {
    Self {
      fetcher,
      queue,
      endpoint,
    }
  }

  /// Submit a transfer.
  ///
  /// Network failure (or the 30 s timeout) does not fail the submission
  /// flow: the payload is enqueued for background retry and the caller is
  /// told it was queued. Enqueueing itself is best-effort; if even that
  /// fails the error is logged and `Queued { id: None }` is reported.
  pub async fn submit(&self, transfer: &TransferRequest) -> Result<SubmitOutcome> {
    let payload = serde_json::to_vec(transfer)
      .map_err(|e| eyre!("Failed to serialize transfer: {}", e))?;

    let request =
      FetchRequest::post_json(self.endpoint.clone(), payload.clone()).with_timeout(SUBMIT_TIMEOUT);

    match self.fetcher.fetch(request).await {
      Ok(response) if response.ok() => {
        let ack: TransferAck = serde_json::from_slice(&response.body)
          .map_err(|e| eyre!("Failed to parse upstream acknowledgement: {}", e))?;
        info!(transaction_id = %ack.transaction_id, "transfer accepted");
        Ok(SubmitOutcome::Accepted(ack))
      }
      Ok(response) => {
        let message = serde_json::from_slice::<serde_json::Value>(&response.body)
          .ok()
          .and_then(|body| body["error"].as_str().map(String::from))
          .unwrap_or_else(|| format!("HTTP {}", response.status));
        warn!(status = response.status, error = %message, "transfer rejected");
        Ok(SubmitOutcome::Rejected {
          status: response.status,
          error: message,
        })
      }
      Err(network_error) => {
        warn!(%network_error, "submission failed, queueing for background sync");
        match self.queue.enqueue(&payload) {
          Ok(id) => Ok(SubmitOutcome::Queued { id: Some(id) }),
          Err(queue_error) => {
            error!(%queue_error, "failed to queue transfer for retry");
            Ok(SubmitOutcome::Queued { id: None })
          }
        }
      }
    }
  }
}
