//! Transaction delivery module for the keeper system.
//!
//! This module owns every interaction with the ledger. The collaborators are
//! split into one trait per concern (height clock, broadcast, result lookup,
//! contract queries, account reads) so that `DeliveryService` receives its
//! broadcast and confirmation strategies by injection and can be driven by
//! in-memory fakes in tests.

use async_trait::async_trait;
use keeper_types::{
	truncate_id, AccountInfo, BatchItem, MultiCallResult, SignedTransaction, TransactionId,
	TxLookup, TxVerdict,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

pub mod multicall;

/// Re-export implementations
pub mod implementations {
	pub mod lcd;
}

pub use multicall::MultiCallBatcher;

/// Retry budgets of the submit-and-confirm protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
	/// Broadcast attempts with the same transaction.
	Submit,
	/// Polls waiting for the block height to pass the send height.
	HeightPoll,
	/// Lookups of a broadcast transaction that is not yet indexed.
	Result,
}

impl fmt::Display for Budget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Budget::Submit => f.write_str("submit"),
			Budget::HeightPoll => f.write_str("height poll"),
			Budget::Result => f.write_str("result"),
		}
	}
}

/// Errors that can occur during transaction delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// A retry ceiling was hit before a verdict was known.
	#[error("{budget} budget exhausted after {attempts} attempts: {last_error}")]
	BudgetExhausted {
		budget: Budget,
		attempts: u32,
		last_error: String,
	},
	/// The ledger answered with something that could not be decoded.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
}

impl DeliveryError {
	/// Returns true when the transaction may have reached the ledger even
	/// though no verdict was obtained.
	pub fn is_ambiguous(&self) -> bool {
		matches!(self, DeliveryError::BudgetExhausted { .. })
	}
}

/// Reads the current chain height, used as a logical clock.
#[async_trait]
pub trait BlockHeightClock: Send + Sync {
	async fn block_height(&self) -> Result<u64, DeliveryError>;
}

/// Fire-and-forget broadcast of signed transactions.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
	/// Broadcasts without waiting for inclusion and returns the transaction id.
	async fn broadcast_async(&self, tx: &SignedTransaction) -> Result<TransactionId, DeliveryError>;
}

/// Looks up committed transactions by id.
#[async_trait]
pub trait TxResultFetcher: Send + Sync {
	/// Returns `TxLookup::NotFound` while the transaction is not indexed yet.
	async fn tx_result(&self, id: &TransactionId) -> Result<TxLookup, DeliveryError>;
}

/// Read-only contract access.
#[async_trait]
pub trait ContractQuerier: Send + Sync {
	/// Runs one smart query and returns the decoded JSON answer.
	async fn query_contract(
		&self,
		contract_address: &str,
		code_hash: &str,
		query: &serde_json::Value,
	) -> Result<serde_json::Value, DeliveryError>;

	/// Runs `items` through the aggregator contract in one round trip.
	///
	/// The answer has one entry per item, in order. Item-level failures are
	/// `MultiCallResult::Error` values; only a failure of the round trip
	/// itself is an `Err`.
	async fn aggregate(&self, items: &[BatchItem]) -> Result<Vec<MultiCallResult>, DeliveryError>;

	/// Returns the code hash of the contract deployed at `contract_address`.
	async fn code_hash(&self, contract_address: &str) -> Result<String, DeliveryError>;
}

/// Reads the signer's account number and sequence.
#[async_trait]
pub trait AccountReader: Send + Sync {
	async fn account_info(&self, address: &str) -> Result<AccountInfo, DeliveryError>;
}

/// Budgets and delays of `DeliveryService::submit_and_confirm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPolicy {
	pub submit_attempts: u32,
	pub submit_retry_delay: Duration,
	pub height_poll_interval: Duration,
	pub max_height_polls: u32,
	/// Wait after the height advanced, to tolerate read-replica lag.
	pub settle_delay: Duration,
	pub result_attempts: u32,
	pub result_retry_delay: Duration,
}

impl Default for ConfirmPolicy {
	fn default() -> Self {
		Self {
			submit_attempts: 20,
			submit_retry_delay: Duration::from_secs(1),
			height_poll_interval: Duration::from_secs(1),
			max_height_polls: 300,
			settle_delay: Duration::from_secs(1),
			result_attempts: 20,
			result_retry_delay: Duration::from_secs(2),
		}
	}
}

/// Turns a signed transaction into a durable commit or abort verdict.
pub struct DeliveryService {
	clock: Arc<dyn BlockHeightClock>,
	submitter: Arc<dyn TxSubmitter>,
	fetcher: Arc<dyn TxResultFetcher>,
	policy: ConfirmPolicy,
}

impl DeliveryService {
	pub fn new(
		clock: Arc<dyn BlockHeightClock>,
		submitter: Arc<dyn TxSubmitter>,
		fetcher: Arc<dyn TxResultFetcher>,
		policy: ConfirmPolicy,
	) -> Self {
		Self {
			clock,
			submitter,
			fetcher,
			policy,
		}
	}

	/// Builds a service whose three collaborators are the same ledger client.
	pub fn from_ledger<L>(ledger: Arc<L>, policy: ConfirmPolicy) -> Self
	where
		L: BlockHeightClock + TxSubmitter + TxResultFetcher + 'static,
	{
		Self::new(ledger.clone(), ledger.clone(), ledger, policy)
	}

	pub fn policy(&self) -> &ConfirmPolicy {
		&self.policy
	}

	/// Broadcasts `tx` and waits until the ledger reports its result.
	///
	/// Never returns `TxVerdict::Pending`. An error before the broadcast is a
	/// plain `Network` error; every budget exhausted afterwards is reported as
	/// `BudgetExhausted`, since the transaction may still have committed.
	#[instrument(skip_all, fields(fee = %tx.fee))]
	pub async fn submit_and_confirm(
		&self,
		tx: &SignedTransaction,
	) -> Result<TxVerdict, DeliveryError> {
		let sent_height = self.clock.block_height().await?;

		let id = self.broadcast(tx).await?;
		tracing::info!(tx_id = %truncate_id(&id.0), sent_height, "Transaction broadcast");

		self.wait_for_height(sent_height).await?;
		tokio::time::sleep(self.policy.settle_delay).await;

		let verdict = self.fetch_result(&id).await?;
		match &verdict {
			TxVerdict::Committed(_) => {
				tracing::info!(tx_id = %truncate_id(&id.0), "Transaction committed")
			},
			TxVerdict::Aborted(raw_log) => {
				tracing::warn!(tx_id = %truncate_id(&id.0), raw_log = %raw_log, "Transaction aborted")
			},
			TxVerdict::Pending => {},
		}
		Ok(verdict)
	}

	/// Broadcasts the same transaction until the ledger hands back an id.
	async fn broadcast(&self, tx: &SignedTransaction) -> Result<TransactionId, DeliveryError> {
		let attempts = self.policy.submit_attempts.max(1);
		let mut last_error = String::new();

		for attempt in 1..=attempts {
			match self.submitter.broadcast_async(tx).await {
				Ok(id) => return Ok(id),
				Err(e) => {
					tracing::warn!(attempt, error = %e, "Broadcast failed");
					last_error = e.to_string();
				},
			}
			if attempt < attempts {
				tokio::time::sleep(self.policy.submit_retry_delay).await;
			}
		}

		Err(DeliveryError::BudgetExhausted {
			budget: Budget::Submit,
			attempts,
			last_error,
		})
	}

	/// Polls the height until a block after `sent_height` exists.
	async fn wait_for_height(&self, sent_height: u64) -> Result<u64, DeliveryError> {
		let polls = self.policy.max_height_polls.max(1);
		let mut last_error = format!("height stayed at {}", sent_height);

		for _ in 0..polls {
			tokio::time::sleep(self.policy.height_poll_interval).await;
			match self.clock.block_height().await {
				Ok(height) if height > sent_height => return Ok(height),
				Ok(height) => last_error = format!("height stayed at {}", height),
				Err(e) => {
					tracing::debug!(error = %e, "Height poll failed");
					last_error = e.to_string();
				},
			}
		}

		Err(DeliveryError::BudgetExhausted {
			budget: Budget::HeightPoll,
			attempts: polls,
			last_error,
		})
	}

	/// Fetches the result, retrying while the transaction is not indexed.
	async fn fetch_result(&self, id: &TransactionId) -> Result<TxVerdict, DeliveryError> {
		let attempts = self.policy.result_attempts.max(1);
		let mut last_error = String::new();

		for attempt in 1..=attempts {
			match self.fetcher.tx_result(id).await {
				Ok(TxLookup::Found(record)) => return Ok(record.into_verdict()),
				Ok(TxLookup::NotFound) => {
					tracing::debug!(tx_id = %truncate_id(&id.0), attempt, "Transaction not found yet");
					last_error = format!("transaction {} not found", id);
				},
				Err(e) => {
					tracing::warn!(tx_id = %truncate_id(&id.0), attempt, error = %e, "Result lookup failed");
					last_error = e.to_string();
				},
			}
			if attempt < attempts {
				tokio::time::sleep(self.policy.result_retry_delay).await;
			}
		}

		Err(DeliveryError::BudgetExhausted {
			budget: Budget::Result,
			attempts,
			last_error,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use keeper_types::{Fee, TxRecord};
	use serde_json::json;
	use std::collections::VecDeque;
	use std::sync::Mutex;
	use tokio::time::Instant;

	/// Ledger that replays scripted answers; the last answer of each script repeats.
	#[derive(Default)]
	struct ScriptedLedger {
		heights: Mutex<VecDeque<Result<u64, String>>>,
		broadcasts: Mutex<VecDeque<Result<String, String>>>,
		lookups: Mutex<VecDeque<TxLookup>>,
		height_calls: Mutex<u32>,
		broadcast_payloads: Mutex<Vec<Vec<u8>>>,
		lookup_calls: Mutex<u32>,
	}

	fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
		let mut queue = queue.lock().unwrap();
		if queue.len() > 1 {
			queue.pop_front().unwrap()
		} else {
			queue.front().cloned().unwrap()
		}
	}

	impl ScriptedLedger {
		fn new(
			heights: Vec<Result<u64, String>>,
			broadcasts: Vec<Result<String, String>>,
			lookups: Vec<TxLookup>,
		) -> Arc<Self> {
			Arc::new(Self {
				heights: Mutex::new(heights.into()),
				broadcasts: Mutex::new(broadcasts.into()),
				lookups: Mutex::new(lookups.into()),
				..Default::default()
			})
		}

		fn height_calls(&self) -> u32 {
			*self.height_calls.lock().unwrap()
		}

		fn broadcast_count(&self) -> usize {
			self.broadcast_payloads.lock().unwrap().len()
		}

		fn lookup_calls(&self) -> u32 {
			*self.lookup_calls.lock().unwrap()
		}
	}

	#[async_trait]
	impl BlockHeightClock for ScriptedLedger {
		async fn block_height(&self) -> Result<u64, DeliveryError> {
			*self.height_calls.lock().unwrap() += 1;
			next(&self.heights).map_err(DeliveryError::Network)
		}
	}

	#[async_trait]
	impl TxSubmitter for ScriptedLedger {
		async fn broadcast_async(
			&self,
			tx: &SignedTransaction,
		) -> Result<TransactionId, DeliveryError> {
			self.broadcast_payloads
				.lock()
				.unwrap()
				.push(tx.payload.clone());
			next(&self.broadcasts)
				.map(TransactionId)
				.map_err(DeliveryError::Network)
		}
	}

	#[async_trait]
	impl TxResultFetcher for ScriptedLedger {
		async fn tx_result(&self, _id: &TransactionId) -> Result<TxLookup, DeliveryError> {
			*self.lookup_calls.lock().unwrap() += 1;
			Ok(next(&self.lookups))
		}
	}

	fn tx() -> SignedTransaction {
		SignedTransaction::new(b"signed".to_vec(), Fee::new(25_000, "uscrt", 200_000))
	}

	fn record(code: u32, raw_log: &str) -> TxLookup {
		TxLookup::Found(TxRecord {
			id: TransactionId("ABCDEF0123456789".to_string()),
			height: 101,
			code,
			raw_log: raw_log.to_string(),
			logs: json!([{ "msg_index": 0 }]),
		})
	}

	#[tokio::test(start_paused = true)]
	async fn test_committed_after_two_not_found() {
		let ledger = ScriptedLedger::new(
			vec![Ok(100), Ok(100), Ok(101)],
			vec![Ok("ABCDEF0123456789".to_string())],
			vec![TxLookup::NotFound, TxLookup::NotFound, record(0, "[]")],
		);
		let service = DeliveryService::from_ledger(ledger.clone(), ConfirmPolicy::default());

		let start = Instant::now();
		let verdict = service.submit_and_confirm(&tx()).await.unwrap();

		assert_eq!(verdict, TxVerdict::Committed(json!([{ "msg_index": 0 }])));
		assert_eq!(ledger.broadcast_count(), 1);
		// One read of the send height, then two polls.
		assert_eq!(ledger.height_calls(), 3);
		// Two retries after the first lookup.
		assert_eq!(ledger.lookup_calls(), 3);
		// 2 polls x 1s + settle 1s + 2 retries x 2s.
		assert_eq!(start.elapsed(), Duration::from_secs(7));
	}

	#[tokio::test(start_paused = true)]
	async fn test_failure_marker_aborts() {
		let raw_log = "failed to execute message; message index: 0: out of gas";
		let ledger = ScriptedLedger::new(
			vec![Ok(10), Ok(11)],
			vec![Ok("AB".to_string())],
			vec![record(0, raw_log)],
		);
		let service = DeliveryService::from_ledger(ledger, ConfirmPolicy::default());

		let verdict = service.submit_and_confirm(&tx()).await.unwrap();
		assert_eq!(verdict, TxVerdict::Aborted(raw_log.to_string()));
	}

	#[tokio::test(start_paused = true)]
	async fn test_broadcast_retried_with_same_transaction() {
		let ledger = ScriptedLedger::new(
			vec![Ok(10), Ok(11)],
			vec![
				Err("connection reset".to_string()),
				Err("connection reset".to_string()),
				Ok("AB".to_string()),
			],
			vec![record(0, "[]")],
		);
		let service = DeliveryService::from_ledger(ledger.clone(), ConfirmPolicy::default());

		service.submit_and_confirm(&tx()).await.unwrap();

		let payloads = ledger.broadcast_payloads.lock().unwrap();
		assert_eq!(payloads.len(), 3);
		assert!(payloads.iter().all(|p| p == b"signed"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_submit_budget_exhausted() {
		let ledger = ScriptedLedger::new(
			vec![Ok(10)],
			vec![Err("connection refused".to_string())],
			vec![TxLookup::NotFound],
		);
		let policy = ConfirmPolicy {
			submit_attempts: 3,
			..Default::default()
		};
		let service = DeliveryService::from_ledger(ledger.clone(), policy);

		let err = service.submit_and_confirm(&tx()).await.unwrap_err();
		assert!(matches!(
			&err,
			DeliveryError::BudgetExhausted {
				budget: Budget::Submit,
				attempts: 3,
				last_error,
			} if last_error.contains("connection refused")
		));
		assert!(err.is_ambiguous());
		assert_eq!(ledger.broadcast_count(), 3);
		assert_eq!(ledger.lookup_calls(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_result_budget_exhausted() {
		let ledger = ScriptedLedger::new(
			vec![Ok(10), Ok(11)],
			vec![Ok("AB".to_string())],
			vec![TxLookup::NotFound],
		);
		let policy = ConfirmPolicy {
			result_attempts: 4,
			..Default::default()
		};
		let service = DeliveryService::from_ledger(ledger.clone(), policy);

		let err = service.submit_and_confirm(&tx()).await.unwrap_err();
		assert!(matches!(
			&err,
			DeliveryError::BudgetExhausted {
				budget: Budget::Result,
				attempts: 4,
				last_error,
			} if last_error.contains("not found")
		));
		assert!(err.is_ambiguous());
		assert_eq!(ledger.lookup_calls(), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_stalled_height_is_bounded() {
		let ledger = ScriptedLedger::new(
			vec![Ok(10), Err("502 bad gateway".to_string()), Ok(10)],
			vec![Ok("AB".to_string())],
			vec![record(0, "[]")],
		);
		let policy = ConfirmPolicy {
			max_height_polls: 5,
			..Default::default()
		};
		let service = DeliveryService::from_ledger(ledger.clone(), policy);

		let err = service.submit_and_confirm(&tx()).await.unwrap_err();
		assert!(matches!(
			err,
			DeliveryError::BudgetExhausted {
				budget: Budget::HeightPoll,
				attempts: 5,
				..
			}
		));
		assert_eq!(ledger.height_calls(), 6);
		assert_eq!(ledger.lookup_calls(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_height_read_failure_before_broadcast() {
		let ledger = ScriptedLedger::new(
			vec![Err("dns failure".to_string())],
			vec![Ok("AB".to_string())],
			vec![record(0, "[]")],
		);
		let service = DeliveryService::from_ledger(ledger.clone(), ConfirmPolicy::default());

		let err = service.submit_and_confirm(&tx()).await.unwrap_err();
		assert!(matches!(err, DeliveryError::Network(_)));
		assert!(!err.is_ambiguous());
		assert_eq!(ledger.broadcast_count(), 0);
	}
}
