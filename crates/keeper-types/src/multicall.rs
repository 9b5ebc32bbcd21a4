//! Batched contract query types.

use serde::{Deserialize, Serialize};

/// One read-only contract query inside a multicall batch.
///
/// Batches are ordered: the response at position `i` always answers the
/// request at position `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
	pub contract_address: String,
	pub code_hash: String,
	pub query: serde_json::Value,
}

impl BatchItem {
	pub fn new(
		contract_address: impl Into<String>,
		code_hash: impl Into<String>,
		query: serde_json::Value,
	) -> Self {
		Self {
			contract_address: contract_address.into(),
			code_hash: code_hash.into(),
			query,
		}
	}
}

/// Per-item answer of a multicall batch.
///
/// An item-level error never fails its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiCallResult {
	Data(serde_json::Value),
	Error(String),
}

impl MultiCallResult {
	pub fn data(&self) -> Option<&serde_json::Value> {
		match self {
			MultiCallResult::Data(value) => Some(value),
			MultiCallResult::Error(_) => None,
		}
	}

	pub fn error(&self) -> Option<&str> {
		match self {
			MultiCallResult::Data(_) => None,
			MultiCallResult::Error(e) => Some(e),
		}
	}

	pub fn is_error(&self) -> bool {
		matches!(self, MultiCallResult::Error(_))
	}
}
