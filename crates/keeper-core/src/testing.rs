//! In-memory ledger shared by the engine tests.
//!
//! Executes `advance_epoch` and `vest` messages against a tiny contract model
//! and lets tests script how each broadcast for a contract ends.

use async_trait::async_trait;
use keeper_delivery::{
	AccountReader, BlockHeightClock, ConfirmPolicy, ContractQuerier, DeliveryError,
	DeliveryService, TxResultFetcher, TxSubmitter,
};
use keeper_types::{
	AccountInfo, BatchItem, Fee, MultiCallResult, SignedTransaction, TransactionId, TxLookup,
	TxRecord,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a broadcast ends.
#[derive(Debug, Clone)]
pub enum Step {
	/// Executes the message; contract errors abort the transaction.
	Commit,
	/// Aborts with the given raw log.
	Abort(String),
	/// Accepted but never indexed; `landed` decides whether it executed.
	Lost { landed: bool },
	/// The broadcast endpoint is unreachable.
	BroadcastDown,
}

#[derive(Debug, Clone)]
pub struct Sent {
	pub contract: String,
	pub msg: Value,
	pub fee: Fee,
}

#[derive(Default)]
pub struct ChainState {
	pub epochs: HashMap<String, u64>,
	/// (claimed, unlocked)
	pub vesting: HashMap<String, (u64, u64)>,
	pub scripts: HashMap<String, VecDeque<Step>>,
	/// Raw log every broadcast to the contract aborts with.
	pub always_abort: HashMap<String, String>,
	pub broken_queries: HashSet<String>,
	pub txs: HashMap<String, TxLookup>,
	pub sent: Vec<Sent>,
	pub queries: usize,
	pub aggregate_calls: usize,
	pub sequence: u64,
}

impl ChainState {
	fn next_step(&mut self, contract: &str) -> Step {
		if let Some(step) = self.scripts.get_mut(contract).and_then(VecDeque::pop_front) {
			return step;
		}
		match self.always_abort.get(contract) {
			Some(raw_log) => Step::Abort(raw_log.clone()),
			None => Step::Commit,
		}
	}

	/// Runs `msg` against the contract model; `Err` is the abort log.
	fn execute(&mut self, contract: &str, msg: &Value) -> Result<(), String> {
		if let Some(next) = msg.pointer("/advance_epoch/epoch").and_then(Value::as_u64) {
			let current = self.epochs.entry(contract.to_string()).or_default();
			if next == *current + 1 {
				*current = next;
				return Ok(());
			}
			return Err("failed to execute message; message index: 0: epoch already advanced".into());
		}
		if msg.get("vest").is_some() {
			let (claimed, unlocked) = self
				.vesting
				.get_mut(contract)
				.ok_or_else(|| "failed to execute message; unknown contract".to_string())?;
			if *claimed == *unlocked {
				return Err("failed to execute message; message index: 0: nothing to vest".into());
			}
			*claimed = *unlocked;
			return Ok(());
		}
		Err("failed to execute message; unknown message".into())
	}

	fn query(&mut self, contract: &str, query: &Value) -> Result<Value, DeliveryError> {
		self.queries += 1;
		if self.broken_queries.contains(contract) {
			return Err(DeliveryError::Network(format!("query to {} failed", contract)));
		}
		if query.get("epoch").is_some() {
			if let Some(epoch) = self.epochs.get(contract) {
				return Ok(json!({ "epoch": epoch }));
			}
		}
		if query.get("vesting_status").is_some() {
			if let Some((claimed, unlocked)) = self.vesting.get(contract) {
				return Ok(json!({
					"claimed": claimed.to_string(),
					"unlocked": unlocked.to_string(),
				}));
			}
		}
		Err(DeliveryError::InvalidResponse(format!(
			"contract {} cannot answer {}",
			contract, query
		)))
	}
}

#[derive(Default)]
pub struct FakeLedger {
	height: AtomicU64,
	pub state: Mutex<ChainState>,
}

impl FakeLedger {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with_state(&self, f: impl FnOnce(&mut ChainState)) {
		f(&mut self.state.lock().unwrap());
	}

	pub fn script(&self, contract: &str, steps: Vec<Step>) {
		self.with_state(|s| {
			s.scripts
				.entry(contract.to_string())
				.or_default()
				.extend(steps)
		});
	}

	pub fn sent_to(&self, contract: &str) -> Vec<Sent> {
		self.state
			.lock()
			.unwrap()
			.sent
			.iter()
			.filter(|s| s.contract == contract)
			.cloned()
			.collect()
	}

	pub fn sent_count(&self) -> usize {
		self.state.lock().unwrap().sent.len()
	}

	pub fn epoch(&self, contract: &str) -> u64 {
		self.state.lock().unwrap().epochs[contract]
	}
}

fn record(id: &str, code: u32, raw_log: &str) -> TxLookup {
	TxLookup::Found(TxRecord {
		id: TransactionId(id.to_string()),
		height: 1,
		code,
		raw_log: raw_log.to_string(),
		logs: Value::Array(Vec::new()),
	})
}

#[async_trait]
impl BlockHeightClock for FakeLedger {
	async fn block_height(&self) -> Result<u64, DeliveryError> {
		Ok(self.height.fetch_add(1, Ordering::SeqCst) + 1)
	}
}

#[async_trait]
impl TxSubmitter for FakeLedger {
	async fn broadcast_async(&self, tx: &SignedTransaction) -> Result<TransactionId, DeliveryError> {
		let payload: Value = serde_json::from_slice(&tx.payload)
			.map_err(|e| DeliveryError::InvalidResponse(e.to_string()))?;
		let value = &payload["msg"][0]["value"];
		let contract = value["contract"].as_str().unwrap_or_default().to_string();
		let msg = value["msg"].clone();

		let mut state = self.state.lock().unwrap();
		let step = state.next_step(&contract);
		state.sent.push(Sent {
			contract: contract.clone(),
			msg: msg.clone(),
			fee: tx.fee.clone(),
		});
		let id = format!("TX{:04}", state.sent.len());

		match step {
			Step::BroadcastDown => {
				return Err(DeliveryError::Network("connection refused".to_string()));
			},
			Step::Commit => {
				state.sequence += 1;
				let lookup = match state.execute(&contract, &msg) {
					Ok(()) => record(&id, 0, "[]"),
					Err(raw_log) => record(&id, 5, &raw_log),
				};
				state.txs.insert(id.clone(), lookup);
			},
			Step::Abort(raw_log) => {
				state.sequence += 1;
				state.txs.insert(id.clone(), record(&id, 5, &raw_log));
			},
			Step::Lost { landed } => {
				if landed {
					state.sequence += 1;
					let _ = state.execute(&contract, &msg);
				}
			},
		}

		Ok(TransactionId(id))
	}
}

#[async_trait]
impl TxResultFetcher for FakeLedger {
	async fn tx_result(&self, id: &TransactionId) -> Result<TxLookup, DeliveryError> {
		let state = self.state.lock().unwrap();
		Ok(state.txs.get(&id.0).cloned().unwrap_or(TxLookup::NotFound))
	}
}

#[async_trait]
impl ContractQuerier for FakeLedger {
	async fn query_contract(
		&self,
		contract_address: &str,
		_code_hash: &str,
		query: &Value,
	) -> Result<Value, DeliveryError> {
		self.state.lock().unwrap().query(contract_address, query)
	}

	async fn aggregate(&self, items: &[BatchItem]) -> Result<Vec<MultiCallResult>, DeliveryError> {
		let mut state = self.state.lock().unwrap();
		state.aggregate_calls += 1;
		Ok(items
			.iter()
			.map(|item| match state.query(&item.contract_address, &item.query) {
				Ok(value) => MultiCallResult::Data(value),
				Err(e) => MultiCallResult::Error(e.to_string()),
			})
			.collect())
	}

	async fn code_hash(&self, contract_address: &str) -> Result<String, DeliveryError> {
		Ok(format!("hash-{}", contract_address))
	}
}

#[async_trait]
impl AccountReader for FakeLedger {
	async fn account_info(&self, _address: &str) -> Result<AccountInfo, DeliveryError> {
		Ok(AccountInfo {
			account_number: 1,
			sequence: self.state.lock().unwrap().sequence,
		})
	}
}

/// Short budgets; tests run with paused time anyway.
pub fn fast_policy() -> ConfirmPolicy {
	ConfirmPolicy {
		submit_attempts: 2,
		submit_retry_delay: Duration::from_secs(1),
		height_poll_interval: Duration::from_secs(1),
		max_height_polls: 3,
		settle_delay: Duration::from_secs(1),
		result_attempts: 3,
		result_retry_delay: Duration::from_secs(1),
	}
}

pub fn delivery(ledger: &Arc<FakeLedger>) -> Arc<DeliveryService> {
	Arc::new(DeliveryService::from_ledger(ledger.clone(), fast_policy()))
}

/// Unsigned StdTx-shaped payload carrying one execute message.
pub fn raw_tx(contract: &str, msg: Value, fee: &Fee) -> SignedTransaction {
	let payload = json!({
		"msg": [{
			"type": "wasm/MsgExecuteContract",
			"value": { "sender": "secret1keeper", "contract": contract, "msg": msg, "funds": [] }
		}]
	});
	SignedTransaction::new(payload.to_string().into_bytes(), fee.clone())
}

pub fn base_fee() -> Fee {
	Fee::new(25_000, "uscrt", 200_000)
}
