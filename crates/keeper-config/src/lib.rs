//! Configuration module for the keeper system.
//!
//! This module provides structures and utilities for managing keeper configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use chrono::{DateTime, Utc};
use keeper_types::{Fee, JobKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the keeper.
///
/// Connection, signer, fee and retry settings for one keeper instance, plus
/// the resources it seeds into storage at start-up.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to the keeper instance.
	pub keeper: KeeperConfig,
	/// Ledger endpoint settings.
	pub network: NetworkConfig,
	/// Signer configuration.
	pub account: AccountConfig,
	/// Starting fee for every run.
	pub fee: FeeConfig,
	/// Submit-and-confirm budgets and delays.
	#[serde(default)]
	pub delivery: DeliveryConfig,
	/// Retry loop and catch-up budgets.
	#[serde(default)]
	pub retry: RetryConfig,
	/// Batched read settings.
	#[serde(default)]
	pub multicall: MulticallConfig,
	/// Extra error patterns appended to the built-in classifier.
	#[serde(default)]
	pub classifier: ClassifierConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Failure notification settings.
	#[serde(default)]
	pub notify: NotifyConfig,
	/// Resources seeded into storage when the keeper starts.
	#[serde(default)]
	pub resources: Vec<ResourceConfig>,
}

/// Configuration specific to the keeper instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeeperConfig {
	/// Unique identifier for this keeper instance, copied into every report.
	pub id: String,
}

/// Ledger endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// Base URL of the ledger's REST (LCD) endpoint.
	pub lcd_url: String,
	/// Chain identifier included in every sign document.
	pub chain_id: String,
	/// Per-request HTTP timeout.
	#[serde(default = "default_request_timeout_seconds")]
	pub request_timeout_seconds: u64,
}

fn default_request_timeout_seconds() -> u64 {
	30
}

/// Configuration for account management.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Fee every run starts from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeeConfig {
	#[serde(default = "default_denom")]
	pub denom: String,
	pub amount: u64,
	pub gas: u64,
}

fn default_denom() -> String {
	"uscrt".to_string()
}

impl FeeConfig {
	pub fn to_fee(&self) -> Fee {
		Fee::new(u128::from(self.amount), self.denom.clone(), self.gas)
	}
}

/// Submit-and-confirm budgets and delays.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
	/// Broadcast attempts with the same transaction before giving up.
	pub submit_attempts: u32,
	pub submit_retry_delay_ms: u64,
	pub height_poll_interval_ms: u64,
	/// Upper bound on height polls while waiting for the next block.
	pub max_height_polls: u32,
	/// Extra wait after the height advanced, for read-replica lag.
	pub settle_delay_ms: u64,
	/// Result fetches while the transaction is not yet indexed.
	pub result_attempts: u32,
	pub result_retry_delay_ms: u64,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			submit_attempts: 20,
			submit_retry_delay_ms: 1_000,
			height_poll_interval_ms: 1_000,
			max_height_polls: 300,
			settle_delay_ms: 1_000,
			result_attempts: 20,
			result_retry_delay_ms: 2_000,
		}
	}
}

/// Retry loop and catch-up budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
	/// Attempt cap for vesting calls. Unbounded when absent.
	pub max_attempts: Option<u32>,
	/// Attempts per single epoch advance before the resource is skipped.
	pub max_retries_per_step: u32,
	/// Pause between consecutive catch-up steps.
	pub step_delay_ms: u64,
	/// Pause before retrying a call whose attempt failed.
	pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: None,
			max_retries_per_step: 3,
			step_delay_ms: 1_000,
			retry_delay_ms: 1_000,
		}
	}
}

impl RetryConfig {
	pub fn step_delay(&self) -> Duration {
		Duration::from_millis(self.step_delay_ms)
	}

	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}
}

/// Batched read settings.
///
/// Without an aggregator contract address counters are read one by one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MulticallConfig {
	pub contract_address: Option<String>,
	pub code_hash: Option<String>,
	pub batch_size: usize,
	pub concurrency: usize,
}

impl Default for MulticallConfig {
	fn default() -> Self {
		Self {
			contract_address: None,
			code_hash: None,
			batch_size: 5,
			concurrency: 2,
		}
	}
}

/// Extra patterns per error class, matched case-insensitively.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
	pub already_satisfied: Vec<String>,
	pub out_of_gas: Vec<String>,
	pub insufficient_fee: Vec<String>,
	pub transient: Vec<String>,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Failure notification settings. Failures are only logged without a webhook.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifyConfig {
	pub webhook_url: Option<String>,
}

/// A resource declared in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
	pub id: String,
	pub contract_address: String,
	/// Looked up from the ledger at start-up when omitted.
	pub code_hash: Option<String>,
	pub created_at: DateTime<Utc>,
	#[serde(default = "default_jobs")]
	pub jobs: Vec<JobKind>,
}

fn default_jobs() -> Vec<JobKind> {
	vec![JobKind::Epoch]
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)));
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.keeper.id.trim().is_empty() {
			return Err(ConfigError::Validation("Keeper ID cannot be empty".into()));
		}

		// Network
		if !(self.network.lcd_url.starts_with("http://")
			|| self.network.lcd_url.starts_with("https://"))
		{
			return Err(ConfigError::Validation(format!(
				"LCD url must start with http:// or https://, got '{}'",
				self.network.lcd_url
			)));
		}
		if self.network.chain_id.trim().is_empty() {
			return Err(ConfigError::Validation("Chain ID cannot be empty".into()));
		}
		if self.network.request_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"request_timeout_seconds must be greater than 0".into(),
			));
		}

		// Account
		if self.account.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Account primary implementation cannot be empty".into(),
			));
		}
		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		// Fee
		if self.fee.amount == 0 {
			return Err(ConfigError::Validation(
				"Fee amount must be greater than 0".into(),
			));
		}
		if self.fee.gas == 0 {
			return Err(ConfigError::Validation("Fee gas must be greater than 0".into()));
		}
		if self.fee.denom.trim().is_empty() {
			return Err(ConfigError::Validation("Fee denom cannot be empty".into()));
		}

		// Delivery budgets
		let budgets = [
			("submit_attempts", self.delivery.submit_attempts),
			("result_attempts", self.delivery.result_attempts),
			("max_height_polls", self.delivery.max_height_polls),
		];
		for (name, value) in budgets {
			if value == 0 {
				return Err(ConfigError::Validation(format!(
					"delivery.{} must be greater than 0",
					name
				)));
			}
		}

		// Retry
		if self.retry.max_retries_per_step == 0 {
			return Err(ConfigError::Validation(
				"retry.max_retries_per_step must be greater than 0".into(),
			));
		}
		if self.retry.max_attempts == Some(0) {
			return Err(ConfigError::Validation(
				"retry.max_attempts must be greater than 0 when set".into(),
			));
		}

		// Multicall
		if self.multicall.batch_size == 0 {
			return Err(ConfigError::Validation(
				"multicall.batch_size must be greater than 0".into(),
			));
		}
		if self.multicall.concurrency == 0 {
			return Err(ConfigError::Validation(
				"multicall.concurrency must be greater than 0".into(),
			));
		}
		if self.multicall.contract_address.is_none() && self.multicall.code_hash.is_some() {
			return Err(ConfigError::Validation(
				"multicall.code_hash is set but multicall.contract_address is missing".into(),
			));
		}

		// Storage
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		// Notify
		if let Some(url) = &self.notify.webhook_url {
			if !(url.starts_with("http://") || url.starts_with("https://")) {
				return Err(ConfigError::Validation(format!(
					"Webhook url must start with http:// or https://, got '{}'",
					url
				)));
			}
		}

		// Resources
		let mut seen = HashSet::new();
		for resource in &self.resources {
			if resource.id.trim().is_empty() {
				return Err(ConfigError::Validation("Resource ID cannot be empty".into()));
			}
			if !seen.insert(resource.id.as_str()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate resource ID '{}'",
					resource.id
				)));
			}
			if resource.contract_address.trim().is_empty() {
				return Err(ConfigError::Validation(format!(
					"Resource '{}' must have a contract_address",
					resource.id
				)));
			}
			if resource.jobs.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Resource '{}' must list at least one job",
					resource.id
				)));
			}
		}

		Ok(())
	}
}

/// Implementation of FromStr trait for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
