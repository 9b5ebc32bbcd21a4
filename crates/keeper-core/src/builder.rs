//! Builder pattern for constructing keeper engines.
//!
//! Storage and account implementations are pluggable through factory
//! functions keyed by implementation name. The ledger client, the delivery
//! policy, the classifier and the notifier are derived from the configuration.
//! Resources listed in the configuration are seeded into storage.

use crate::classify::ErrorClassifier;
use crate::engine::{EngineConfig, KeeperEngine};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::retry::RetryLoop;
use crate::tx::TxFactory;
use keeper_account::{AccountError, AccountInterface, AccountService};
use keeper_config::{Config, DeliveryConfig};
use keeper_delivery::implementations::lcd::LcdClient;
use keeper_delivery::{ConfirmPolicy, ContractQuerier, DeliveryService, MultiCallBatcher};
use keeper_storage::{StorageError, StorageInterface, StorageService};
use keeper_types::{ResourceRecord, StorageKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during keeper engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for the pluggable components, keyed by implementation name.
pub struct KeeperFactories<SF, AF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
}

/// Builder for constructing a KeeperEngine from configuration.
pub struct KeeperBuilder {
	config: Config,
}

impl KeeperBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub async fn build<SF, AF>(
		self,
		factories: KeeperFactories<SF, AF>,
	) -> Result<KeeperEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
	{
		let config = &self.config;

		// Storage
		let storage_config = config
			.storage
			.implementations
			.get(&config.storage.primary)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary storage '{}' is not configured",
					config.storage.primary
				))
			})?;
		let storage_factory = factories
			.storage_factories
			.get(&config.storage.primary)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"storage implementation '{}'",
					config.storage.primary
				))
			})?;
		let backend = storage_factory(storage_config).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %config.storage.primary,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				config.storage.primary, e
			))
		})?;
		let storage = Arc::new(StorageService::new(backend));
		tracing::info!(component = "storage", implementation = %config.storage.primary, "Loaded");

		// Account
		let account_config = config
			.account
			.implementations
			.get(&config.account.primary)
			.ok_or_else(|| {
				BuilderError::Config(format!(
					"Primary account '{}' is not configured",
					config.account.primary
				))
			})?;
		let account_factory = factories
			.account_factories
			.get(&config.account.primary)
			.ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"account implementation '{}'",
					config.account.primary
				))
			})?;
		let account = account_factory(account_config).map_err(|e| {
			tracing::error!(
				component = "account",
				implementation = %config.account.primary,
				error = %e,
				"Failed to create account implementation"
			);
			BuilderError::Config(format!(
				"Failed to create account implementation '{}': {}",
				config.account.primary, e
			))
		})?;
		let account = Arc::new(AccountService::new(account));
		let keeper_address = account
			.get_address()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to get keeper address: {}", e)))?;
		tracing::info!(component = "account", implementation = %config.account.primary, address = %keeper_address, "Loaded");

		// Ledger client
		let mut lcd = LcdClient::new(
			config.network.lcd_url.clone(),
			Duration::from_secs(config.network.request_timeout_seconds),
		)
		.map_err(|e| BuilderError::Config(e.to_string()))?;
		if let Some(address) = &config.multicall.contract_address {
			let code_hash = match &config.multicall.code_hash {
				Some(code_hash) => code_hash.clone(),
				None => lcd.code_hash(address).await.map_err(|e| {
					BuilderError::Config(format!(
						"Failed to look up aggregator code hash: {}",
						e
					))
				})?,
			};
			lcd = lcd.with_aggregator(address.clone(), code_hash);
			tracing::info!(component = "multicall", aggregator = %address, "Loaded");
		}
		let lcd = Arc::new(lcd);

		let delivery = Arc::new(DeliveryService::from_ledger(
			lcd.clone(),
			confirm_policy(&config.delivery),
		));
		let retry = Arc::new(
			RetryLoop::new(delivery, ErrorClassifier::from_config(&config.classifier))
				.with_retry_delay(config.retry.retry_delay()),
		);
		let txs = Arc::new(TxFactory::new(
			account,
			lcd.clone(),
			config.network.chain_id.clone(),
			keeper_address,
		));

		let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
			Some(url) => Arc::new(
				WebhookNotifier::new(
					url.clone(),
					Duration::from_secs(config.network.request_timeout_seconds),
				)
				.map_err(|e| BuilderError::Config(e.to_string()))?,
			),
			None => Arc::new(LogNotifier),
		};

		seed_resources(config, &storage, lcd.as_ref()).await?;

		let engine_config = EngineConfig {
			keeper_id: config.keeper.id.clone(),
			base_fee: config.fee.to_fee(),
			vest_max_attempts: config.retry.max_attempts,
			max_retries_per_step: config.retry.max_retries_per_step,
			step_delay: config.retry.step_delay(),
		};
		let batcher = MultiCallBatcher::with_limits(
			lcd.clone(),
			config.multicall.batch_size,
			config.multicall.concurrency,
		);

		Ok(
			KeeperEngine::new(engine_config, storage, lcd, retry, txs, notifier)
				.with_batcher(batcher),
		)
	}
}

fn confirm_policy(config: &DeliveryConfig) -> ConfirmPolicy {
	ConfirmPolicy {
		submit_attempts: config.submit_attempts,
		submit_retry_delay: Duration::from_millis(config.submit_retry_delay_ms),
		height_poll_interval: Duration::from_millis(config.height_poll_interval_ms),
		max_height_polls: config.max_height_polls,
		settle_delay: Duration::from_millis(config.settle_delay_ms),
		result_attempts: config.result_attempts,
		result_retry_delay: Duration::from_millis(config.result_retry_delay_ms),
	}
}

/// Writes the configured resources to storage, looking up missing code hashes.
async fn seed_resources(
	config: &Config,
	storage: &StorageService,
	querier: &dyn ContractQuerier,
) -> Result<(), BuilderError> {
	for resource in &config.resources {
		let code_hash = match &resource.code_hash {
			Some(code_hash) => code_hash.clone(),
			None => querier
				.code_hash(&resource.contract_address)
				.await
				.map_err(|e| {
					BuilderError::Config(format!(
						"Failed to look up code hash of resource '{}': {}",
						resource.id, e
					))
				})?,
		};
		let record = ResourceRecord {
			id: resource.id.clone(),
			contract_address: resource.contract_address.clone(),
			code_hash,
			created_at: resource.created_at,
			jobs: resource.jobs.clone(),
		};
		storage
			.store(StorageKey::Resources.as_str(), &record.id, &record)
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to seed resource: {}", e)))?;
	}
	if !config.resources.is_empty() {
		tracing::info!(count = config.resources.len(), "Seeded resources");
	}
	Ok(())
}
