//! MT103 transfer submission: wire payload plus the submitting client.

mod client;
mod types;

pub use client::{TransferClient, SUBMIT_TIMEOUT};
pub use types::{Beneficiary, Originator, SubmitOutcome, TransferAck, TransferRequest};
