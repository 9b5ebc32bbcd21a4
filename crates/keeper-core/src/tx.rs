//! Builds signed execute transactions for the keeper's signer.

use crate::retry::CallError;
use keeper_account::AccountService;
use keeper_delivery::AccountReader;
use keeper_types::{Fee, SignRequest, SignedTransaction};
use serde_json::{json, Value};
use std::sync::Arc;

/// Wraps a contract message into an execute message sent by `sender`.
pub fn execute_msg(sender: &str, contract: &str, msg: Value) -> Value {
	json!({
		"type": "wasm/MsgExecuteContract",
		"value": {
			"sender": sender,
			"contract": contract,
			"msg": msg,
			"funds": [],
		}
	})
}

/// Signs execute messages with fresh account state for every build.
///
/// The sequence is read from the ledger each time so a retry after a
/// sequence mismatch signs with the value the ledger expects.
pub struct TxFactory {
	account: Arc<AccountService>,
	reader: Arc<dyn AccountReader>,
	chain_id: String,
	sender: String,
}

impl TxFactory {
	pub fn new(
		account: Arc<AccountService>,
		reader: Arc<dyn AccountReader>,
		chain_id: impl Into<String>,
		sender: impl Into<String>,
	) -> Self {
		Self {
			account,
			reader,
			chain_id: chain_id.into(),
			sender: sender.into(),
		}
	}

	pub fn sender(&self) -> &str {
		&self.sender
	}

	pub async fn execute(
		&self,
		contract: &str,
		msg: Value,
		fee: &Fee,
	) -> Result<SignedTransaction, CallError> {
		let info = self
			.reader
			.account_info(&self.sender)
			.await
			.map_err(|e| CallError::Account(e.to_string()))?;

		let request = SignRequest {
			chain_id: self.chain_id.clone(),
			account_number: info.account_number,
			sequence: info.sequence,
			msgs: vec![execute_msg(&self.sender, contract, msg)],
			fee: fee.clone(),
			memo: String::new(),
		};

		self.account
			.sign(&request)
			.await
			.map_err(|e| CallError::Signing(e.to_string()))
	}
}
