//! Signing request types.

use crate::Fee;
use serde::{Deserialize, Serialize};

/// On-ledger account state needed to sign a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
	pub account_number: u64,
	pub sequence: u64,
}

/// Everything the signer needs to produce a `SignedTransaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
	pub chain_id: String,
	pub account_number: u64,
	pub sequence: u64,
	/// Messages in their ledger JSON encoding.
	pub msgs: Vec<serde_json::Value>,
	pub fee: Fee,
	#[serde(default)]
	pub memo: String,
}
