//! REST (LCD) ledger client.
//!
//! One HTTP client implements every ledger collaborator trait against the
//! legacy LCD routes:
//! - `GET  /blocks/latest`
//! - `POST /txs` (broadcast, `mode = "async"`)
//! - `GET  /txs/{hash}`
//! - `GET  /wasm/contract/{address}/query/{query}?encoding=base64`
//! - `GET  /wasm/contract/{address}/code-hash`
//! - `GET  /auth/accounts/{address}`

use crate::{
	AccountReader, BlockHeightClock, ContractQuerier, DeliveryError, TxResultFetcher, TxSubmitter,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use keeper_types::{
	AccountInfo, BatchItem, MultiCallResult, SignedTransaction, TransactionId, TxLookup, TxRecord,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Aggregator contract used for multicall queries.
#[derive(Debug, Clone)]
struct Aggregator {
	address: String,
	code_hash: String,
}

/// HTTP client for the ledger's LCD endpoint.
pub struct LcdClient {
	client: reqwest::Client,
	base_url: String,
	aggregator: Option<Aggregator>,
}

impl LcdClient {
	pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| DeliveryError::Network(format!("Failed to build HTTP client: {}", e)))?;

		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			aggregator: None,
		})
	}

	/// Enables `aggregate` through the given aggregator contract.
	pub fn with_aggregator(
		mut self,
		address: impl Into<String>,
		code_hash: impl Into<String>,
	) -> Self {
		self.aggregator = Some(Aggregator {
			address: address.into(),
			code_hash: code_hash.into(),
		});
		self
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	/// GETs `path` and returns the status with the JSON body (`Null` when empty).
	async fn get(&self, path: &str) -> Result<(StatusCode, Value), DeliveryError> {
		let response = self
			.client
			.get(self.url(path))
			.send()
			.await
			.map_err(|e| DeliveryError::Network(e.to_string()))?;
		read_body(response).await
	}

	async fn get_ok(&self, path: &str) -> Result<Value, DeliveryError> {
		let (status, body) = self.get(path).await?;
		if !status.is_success() {
			return Err(DeliveryError::Network(format!(
				"GET {} returned {}: {}",
				path,
				status,
				error_message(&body)
			)));
		}
		Ok(body)
	}
}

async fn read_body(response: reqwest::Response) -> Result<(StatusCode, Value), DeliveryError> {
	let status = response.status();
	let text = response
		.text()
		.await
		.map_err(|e| DeliveryError::Network(e.to_string()))?;
	if text.trim().is_empty() {
		return Ok((status, Value::Null));
	}
	match serde_json::from_str(&text) {
		Ok(body) => Ok((status, body)),
		// Proxies answer errors in plain text.
		Err(_) if !status.is_success() => Ok((status, Value::String(text))),
		Err(e) => Err(DeliveryError::InvalidResponse(format!(
			"{}: {}",
			e,
			truncate(&text)
		))),
	}
}

fn truncate(text: &str) -> String {
	text.chars().take(200).collect()
}

fn error_message(body: &Value) -> String {
	match body {
		Value::String(s) => truncate(s),
		_ => body
			.get("error")
			.or_else(|| body.get("message"))
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| truncate(&body.to_string())),
	}
}

/// Reads a number the LCD may encode either as a JSON number or a string.
fn lenient_u64(value: &Value, field: &str) -> Result<u64, DeliveryError> {
	let parsed = match value {
		Value::Number(n) => n.as_u64(),
		Value::String(s) => s.parse().ok(),
		Value::Null => Some(0),
		_ => None,
	};
	parsed.ok_or_else(|| {
		DeliveryError::InvalidResponse(format!("{} is not an integer: {}", field, value))
	})
}

fn parse_height(body: &Value) -> Result<u64, DeliveryError> {
	let height = body
		.pointer("/block/header/height")
		.ok_or_else(|| DeliveryError::InvalidResponse("missing block.header.height".into()))?;
	lenient_u64(height, "height")
}

fn parse_tx_lookup(status: StatusCode, body: &Value) -> Result<TxLookup, DeliveryError> {
	if status == StatusCode::NOT_FOUND {
		return Ok(TxLookup::NotFound);
	}
	let message = error_message(body);
	if !status.is_success() || body.get("error").is_some() {
		if message.to_lowercase().contains("not found") {
			return Ok(TxLookup::NotFound);
		}
		return Err(DeliveryError::Network(format!(
			"transaction lookup returned {}: {}",
			status, message
		)));
	}

	let id = body
		.get("txhash")
		.and_then(Value::as_str)
		.ok_or_else(|| DeliveryError::InvalidResponse("missing txhash".into()))?;
	let code = lenient_u64(body.get("code").unwrap_or(&Value::Null), "code")?;
	let code = u32::try_from(code)
		.map_err(|_| DeliveryError::InvalidResponse(format!("code out of range: {}", code)))?;

	Ok(TxLookup::Found(TxRecord {
		id: TransactionId(id.to_string()),
		height: lenient_u64(body.get("height").unwrap_or(&Value::Null), "height")?,
		code,
		raw_log: body
			.get("raw_log")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string(),
		logs: body.get("logs").cloned().unwrap_or(Value::Null),
	}))
}

fn parse_account_info(body: &Value) -> Result<AccountInfo, DeliveryError> {
	let result = body.get("result").unwrap_or(body);
	// Some nodes wrap the account in `{type, value}`, others return it flat.
	let account = result.get("value").unwrap_or(result);

	Ok(AccountInfo {
		account_number: lenient_u64(
			account.get("account_number").unwrap_or(&Value::Null),
			"account_number",
		)?,
		sequence: lenient_u64(account.get("sequence").unwrap_or(&Value::Null), "sequence")?,
	})
}

/// Decodes a smart-query answer: `{"result": {"smart": base64(json)}}`.
fn parse_smart_result(body: &Value) -> Result<Value, DeliveryError> {
	let encoded = body
		.pointer("/result/smart")
		.and_then(Value::as_str)
		.ok_or_else(|| DeliveryError::InvalidResponse("missing result.smart".into()))?;
	decode_json(encoded)
}

fn decode_json(encoded: &str) -> Result<Value, DeliveryError> {
	let bytes = STANDARD
		.decode(encoded)
		.map_err(|e| DeliveryError::InvalidResponse(format!("invalid base64: {}", e)))?;
	serde_json::from_slice(&bytes)
		.map_err(|e| DeliveryError::InvalidResponse(format!("invalid JSON payload: {}", e)))
}

/// One entry of the aggregator's answer.
#[derive(Debug, Deserialize)]
struct AggregateEntry {
	success: bool,
	#[serde(default)]
	data: Option<String>,
	#[serde(default)]
	error: Option<String>,
}

fn aggregate_query(items: &[BatchItem]) -> Value {
	let queries: Vec<Value> = items
		.iter()
		.map(|item| {
			json!({
				"contract_address": item.contract_address,
				"code_hash": item.code_hash,
				"query": STANDARD.encode(item.query.to_string()),
			})
		})
		.collect();
	json!({ "aggregate": { "queries": queries } })
}

/// Converts the aggregator answer into per-item results.
///
/// Undecodable entries become item-level errors.
fn parse_aggregate(answer: Value) -> Result<Vec<MultiCallResult>, DeliveryError> {
	let entries: Vec<AggregateEntry> = serde_json::from_value(answer)
		.map_err(|e| DeliveryError::InvalidResponse(format!("invalid aggregate answer: {}", e)))?;

	Ok(entries
		.into_iter()
		.map(|entry| match (entry.success, entry.data) {
			(true, Some(data)) => match decode_json(&data) {
				Ok(value) => MultiCallResult::Data(value),
				Err(e) => MultiCallResult::Error(e.to_string()),
			},
			(true, None) => MultiCallResult::Data(Value::Null),
			(false, _) => MultiCallResult::Error(
				entry
					.error
					.unwrap_or_else(|| "query failed without error message".to_string()),
			),
		})
		.collect())
}

#[async_trait]
impl BlockHeightClock for LcdClient {
	async fn block_height(&self) -> Result<u64, DeliveryError> {
		let body = self.get_ok("/blocks/latest").await?;
		parse_height(&body)
	}
}

#[async_trait]
impl TxSubmitter for LcdClient {
	async fn broadcast_async(&self, tx: &SignedTransaction) -> Result<TransactionId, DeliveryError> {
		let tx_json: Value = serde_json::from_slice(&tx.payload)
			.map_err(|e| DeliveryError::InvalidResponse(format!("payload is not JSON: {}", e)))?;

		let response = self
			.client
			.post(self.url("/txs"))
			.json(&json!({ "tx": tx_json, "mode": "async" }))
			.send()
			.await
			.map_err(|e| DeliveryError::Network(e.to_string()))?;
		let (status, body) = read_body(response).await?;

		if !status.is_success() {
			return Err(DeliveryError::Network(format!(
				"broadcast returned {}: {}",
				status,
				error_message(&body)
			)));
		}

		body.get("txhash")
			.and_then(Value::as_str)
			.map(|hash| TransactionId(hash.to_string()))
			.ok_or_else(|| DeliveryError::InvalidResponse("broadcast answer has no txhash".into()))
	}
}

#[async_trait]
impl TxResultFetcher for LcdClient {
	async fn tx_result(&self, id: &TransactionId) -> Result<TxLookup, DeliveryError> {
		let (status, body) = self.get(&format!("/txs/{}", id)).await?;
		parse_tx_lookup(status, &body)
	}
}

#[async_trait]
impl ContractQuerier for LcdClient {
	async fn query_contract(
		&self,
		contract_address: &str,
		_code_hash: &str,
		query: &Value,
	) -> Result<Value, DeliveryError> {
		// URL-safe alphabet keeps the query a single path segment.
		let encoded = base64::engine::general_purpose::URL_SAFE.encode(query.to_string());
		let body = self
			.get_ok(&format!(
				"/wasm/contract/{}/query/{}?encoding=base64",
				contract_address, encoded
			))
			.await?;
		parse_smart_result(&body)
	}

	async fn aggregate(&self, items: &[BatchItem]) -> Result<Vec<MultiCallResult>, DeliveryError> {
		let aggregator = self.aggregator.as_ref().ok_or_else(|| {
			DeliveryError::Network("no aggregator contract configured".to_string())
		})?;
		if items.is_empty() {
			return Ok(Vec::new());
		}

		let answer = self
			.query_contract(
				&aggregator.address,
				&aggregator.code_hash,
				&aggregate_query(items),
			)
			.await?;
		parse_aggregate(answer)
	}

	async fn code_hash(&self, contract_address: &str) -> Result<String, DeliveryError> {
		let body = self
			.get_ok(&format!("/wasm/contract/{}/code-hash", contract_address))
			.await?;
		body.get("result")
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| DeliveryError::InvalidResponse("missing code hash".into()))
	}
}

#[async_trait]
impl AccountReader for LcdClient {
	async fn account_info(&self, address: &str) -> Result<AccountInfo, DeliveryError> {
		let body = self.get_ok(&format!("/auth/accounts/{}", address)).await?;
		parse_account_info(&body)
	}
}
