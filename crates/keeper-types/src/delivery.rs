//! Transaction delivery types for the keeper system.
//!
//! This module defines the values exchanged with the ledger when a signed
//! transaction is broadcast and its committed result is looked up.

use crate::Fee;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker the ledger writes into the raw log of a transaction that did not apply.
pub const FAILURE_MARKER: &str = "failed";

/// Signed transaction ready for broadcast.
///
/// The payload is opaque to everything but the signer and the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	/// Encoded transaction bytes.
	pub payload: Vec<u8>,
	/// Fee declared inside the payload.
	pub fee: Fee,
}

impl SignedTransaction {
	pub fn new(payload: Vec<u8>, fee: Fee) -> Self {
		Self { payload, fee }
	}
}

/// Handle returned by an asynchronous broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Committed transaction as indexed by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
	pub id: TransactionId,
	/// Height of the block that included the transaction.
	pub height: u64,
	/// Result code, zero when execution succeeded.
	pub code: u32,
	pub raw_log: String,
	#[serde(default)]
	pub logs: serde_json::Value,
}

impl TxRecord {
	/// Returns true when the ledger rejected the transaction during execution.
	pub fn is_failure(&self) -> bool {
		self.code != 0 || self.raw_log.contains(FAILURE_MARKER)
	}

	/// Converts the record into its terminal verdict.
	pub fn into_verdict(self) -> TxVerdict {
		if self.is_failure() {
			TxVerdict::Aborted(self.raw_log)
		} else {
			TxVerdict::Committed(self.logs)
		}
	}
}

/// Result of looking up a transaction by id.
#[derive(Debug, Clone, PartialEq)]
pub enum TxLookup {
	/// The ledger has not indexed the transaction (yet).
	NotFound,
	/// The transaction is indexed, whether it succeeded or failed.
	Found(TxRecord),
}

/// Verdict for a submitted transaction.
///
/// `Pending` only exists while confirmation is in progress and is never
/// handed to callers of the submit-and-confirm protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum TxVerdict {
	Pending,
	/// Execution succeeded; carries the event logs.
	Committed(serde_json::Value),
	/// Execution failed; carries the raw log.
	Aborted(String),
}

impl TxVerdict {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, TxVerdict::Pending)
	}
}
