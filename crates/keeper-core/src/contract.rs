//! Bindings for the contracts the keeper drives.
//!
//! Epoch contracts answer `{"epoch":{}}` with `{"epoch": n}` and accept
//! `{"advance_epoch":{"epoch": n}}`, which only succeeds for the next epoch.
//! Vesting contracts accept `{"vest":{}}` and report
//! `{"vesting_status":{}}` as `{claimed, unlocked}` amounts.

use crate::catchup::EpochResource;
use crate::retry::{CallError, IdempotentCall};
use crate::tx::TxFactory;
use async_trait::async_trait;
use keeper_delivery::ContractQuerier;
use keeper_types::{Fee, ResourceRecord, SignedTransaction};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn epoch_query() -> Value {
	json!({ "epoch": {} })
}

pub fn advance_epoch_msg(epoch: u64) -> Value {
	json!({ "advance_epoch": { "epoch": epoch } })
}

pub fn parse_epoch(answer: &Value) -> Result<u64, CallError> {
	answer
		.get("epoch")
		.and_then(|v| match v {
			Value::Number(n) => n.as_u64(),
			Value::String(s) => s.parse().ok(),
			_ => None,
		})
		.ok_or_else(|| CallError::Query(format!("unexpected epoch answer: {}", answer)))
}

fn amount(value: &Value) -> Option<String> {
	match value {
		Value::String(s) => Some(s.trim().to_string()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

/// True when everything unlocked has been claimed.
pub fn vesting_settled(status: &Value) -> Result<bool, CallError> {
	let claimed = status.get("claimed").and_then(amount);
	let unlocked = status.get("unlocked").and_then(amount);
	match (claimed, unlocked) {
		(Some(claimed), Some(unlocked)) => Ok(claimed == unlocked),
		_ => Err(CallError::Query(format!(
			"unexpected vesting status: {}",
			status
		))),
	}
}

/// A stored resource bound to the ledger.
pub struct ContractResource {
	record: ResourceRecord,
	querier: Arc<dyn ContractQuerier>,
	txs: Arc<TxFactory>,
}

impl ContractResource {
	pub fn new(
		record: ResourceRecord,
		querier: Arc<dyn ContractQuerier>,
		txs: Arc<TxFactory>,
	) -> Self {
		Self {
			record,
			querier,
			txs,
		}
	}

	pub fn record(&self) -> &ResourceRecord {
		&self.record
	}

	async fn query(&self, query: &Value) -> Result<Value, CallError> {
		self.querier
			.query_contract(
				&self.record.contract_address,
				&self.record.code_hash,
				query,
			)
			.await
			.map_err(|e| CallError::Query(e.to_string()))
	}

	/// The vesting call of this resource.
	pub fn vest(&self) -> VestCall<'_> {
		VestCall { resource: self }
	}
}

#[async_trait]
impl EpochResource for ContractResource {
	fn id(&self) -> &str {
		&self.record.id
	}

	async fn read_epoch(&self) -> Result<u64, CallError> {
		let answer = self.query(&epoch_query()).await?;
		parse_epoch(&answer)
	}

	async fn build_advance(&self, next: u64, fee: &Fee) -> Result<SignedTransaction, CallError> {
		self.txs
			.execute(&self.record.contract_address, advance_epoch_msg(next), fee)
			.await
	}
}

/// Releases unlocked funds of a vesting contract.
///
/// The state check treats `claimed == unlocked` as proof that the call's
/// effect is in place, which also holds when nothing was due at all.
pub struct VestCall<'a> {
	resource: &'a ContractResource,
}

#[async_trait]
impl IdempotentCall for VestCall<'_> {
	fn label(&self) -> String {
		format!("vest {}", self.resource.record.id)
	}

	async fn build(&self, fee: &Fee) -> Result<SignedTransaction, CallError> {
		self.resource
			.txs
			.execute(
				&self.resource.record.contract_address,
				json!({ "vest": {} }),
				fee,
			)
			.await
	}

	async fn is_satisfied(&self) -> Result<bool, CallError> {
		let status = self
			.resource
			.query(&json!({ "vesting_status": {} }))
			.await?;
		vesting_settled(&status)
	}
}
