//! MT103 transfer payload and upstream response types.

use serde::{Deserialize, Serialize};

/// Protocol identifier the form always sends.
pub const PROTOCOL: &str = "101.1";

/// Server identifier the form always sends.
pub const SERVER: &str = "SBI-3.10.0693.5.2-e19";

/// Default transfer currency.
pub const DEFAULT_CURRENCY: &str = "EUR";

/// The ordering customer. Member names are PascalCase on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Originator {
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "Account")]
  pub account: String,
  #[serde(rename = "IBAN")]
  pub iban: String,
  #[serde(rename = "Bank")]
  pub bank: String,
  #[serde(rename = "SWIFT")]
  pub swift: String,
}

/// The beneficiary. Unlike the originator it carries no account number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "IBAN")]
  pub iban: String,
  #[serde(rename = "Bank")]
  pub bank: String,
  #[serde(rename = "SWIFT")]
  pub swift: String,
}

/// The full submission payload for `POST /api/send_mt103`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
  pub protocol: String,
  pub server: String,
  pub currency: String,
  pub amount: f64,
  pub sender: Originator,
  pub receiver: Beneficiary,
}

impl TransferRequest {
  /// Build a payload with the fixed protocol/server/currency fields the
  /// form always sends.
  pub fn new(amount: f64, sender: Originator, receiver: Beneficiary) -> Self {
    Self {
      protocol: PROTOCOL.to_string(),
      server: SERVER.to_string(),
      currency: DEFAULT_CURRENCY.to_string(),
      amount,
      sender,
      receiver,
    }
  }
}

/// Successful upstream acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferAck {
  pub status: String,
  pub transaction_id: String,
  pub timestamp: f64,
  #[serde(default)]
  pub data: serde_json::Value,
}

/// What happened to a submission attempt.
#[derive(Debug)]
pub enum SubmitOutcome {
  /// Upstream accepted the transfer.
  Accepted(TransferAck),
  /// Upstream rejected it with an error body.
  Rejected { status: u16, error: String },
  /// The network was unreachable; the payload was parked in the sync queue
  /// (`id` is `None` when even enqueueing failed — the error is logged).
  Queued { id: Option<i64> },
}
