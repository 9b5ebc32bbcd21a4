//! Keeper engine running one pass over every stored resource.
//!
//! A run loads the resource records, drives the epoch job and then the vest
//! job, persists the per-resource reports and hands every resource that
//! needs attention to the notifier. Transactions are sent strictly one after
//! another since all of them come from the same signer.

mod jobs;

use crate::contract::ContractResource;
use crate::notify::Notifier;
use crate::retry::RetryLoop;
use crate::tx::TxFactory;
use chrono::Utc;
use keeper_delivery::{ContractQuerier, MultiCallBatcher};
use keeper_storage::StorageService;
use keeper_types::{
	CounterRecord, Fee, FailureReport, JobKind, JobReport, ResourceRecord, ResourceReport,
	StorageKey,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Settings of the jobs run by the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub keeper_id: String,
	/// Starting fee of every resource's calls.
	pub base_fee: Fee,
	/// Attempt cap of vest calls; `None` retries until settled.
	pub vest_max_attempts: Option<u32>,
	pub max_retries_per_step: u32,
	/// Pause between two epoch steps of the same resource.
	pub step_delay: Duration,
}

pub struct KeeperEngine {
	config: EngineConfig,
	storage: Arc<StorageService>,
	querier: Arc<dyn ContractQuerier>,
	batcher: MultiCallBatcher,
	retry: Arc<RetryLoop>,
	txs: Arc<TxFactory>,
	notifier: Arc<dyn Notifier>,
}

impl KeeperEngine {
	pub fn new(
		config: EngineConfig,
		storage: Arc<StorageService>,
		querier: Arc<dyn ContractQuerier>,
		retry: Arc<RetryLoop>,
		txs: Arc<TxFactory>,
		notifier: Arc<dyn Notifier>,
	) -> Self {
		let batcher = MultiCallBatcher::new(querier.clone());
		Self {
			config,
			storage,
			querier,
			batcher,
			retry,
			txs,
			notifier,
		}
	}

	/// Replaces the default batcher, e.g. to apply configured limits.
	pub fn with_batcher(mut self, batcher: MultiCallBatcher) -> Self {
		self.batcher = batcher;
		self
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Runs both jobs over every stored resource and returns the run report.
	///
	/// Only a failure to load the resources fails the run. Per-resource
	/// problems end up in the report; persistence and notification problems
	/// are logged.
	#[instrument(skip_all, fields(keeper = %self.config.keeper_id))]
	pub async fn run_once(&self) -> Result<JobReport, EngineError> {
		let run_id = uuid::Uuid::new_v4().to_string();
		let started_at = Utc::now();

		let records: Vec<ResourceRecord> = self
			.storage
			.list::<ResourceRecord>(StorageKey::Resources.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, record)| record)
			.collect();
		tracing::info!(run_id = %run_id, resources = records.len(), "Starting run");

		let resources: Vec<ContractResource> = records
			.into_iter()
			.map(|record| ContractResource::new(record, self.querier.clone(), self.txs.clone()))
			.collect();

		let fee = &self.config.base_fee;
		let mut reports = self.epoch_job(&resources, fee).await;
		reports.extend(self.vest_job(&resources, fee).await);

		let report = JobReport {
			run_id,
			keeper_id: self.config.keeper_id.clone(),
			started_at,
			finished_at: Utc::now(),
			resources: reports,
		};

		self.persist(&report).await;
		self.notify(&report).await;

		tracing::info!(
			run_id = %report.run_id,
			succeeded = report.succeeded(),
			skipped = report.skipped(),
			failed = report.failed(),
			"Run finished"
		);
		Ok(report)
	}

	/// Writes the run to storage. Last write wins; failures are logged.
	async fn persist(&self, report: &JobReport) {
		for resource in &report.resources {
			let id = format!(
				"{}:{}:{}",
				report.run_id, resource.job, resource.resource_id
			);
			if let Err(e) = self
				.storage
				.store(StorageKey::Runs.as_str(), &id, resource)
				.await
			{
				tracing::warn!(key = %id, error = %e, "Failed to store resource report");
			}

			if let (JobKind::Epoch, Some(counter)) = (resource.job, resource.final_counter) {
				let record = CounterRecord {
					counter,
					run_id: report.run_id.clone(),
					updated_at: report.finished_at,
				};
				if let Err(e) = self
					.storage
					.store(StorageKey::Counters.as_str(), &resource.resource_id, &record)
					.await
				{
					tracing::warn!(resource = %resource.resource_id, error = %e, "Failed to store counter");
				}
			}
		}

		if let Err(e) = self
			.storage
			.store(StorageKey::Reports.as_str(), &report.run_id, report)
			.await
		{
			tracing::warn!(run_id = %report.run_id, error = %e, "Failed to store run report");
		}
	}

	async fn notify(&self, report: &JobReport) {
		for resource in report.resources.iter().filter(|r| r.needs_attention()) {
			let failure = failure_report(&report.run_id, resource);
			if let Err(e) = self.notifier.notify(&failure).await {
				tracing::warn!(resource = %resource.resource_id, error = %e, "Failed to notify");
			}
		}
	}
}

fn failure_report(run_id: &str, resource: &ResourceReport) -> FailureReport {
	FailureReport {
		run_id: run_id.to_string(),
		resource_id: resource.resource_id.clone(),
		job: resource.job,
		status: resource.status,
		error: resource
			.error
			.clone()
			.unwrap_or_else(|| "unknown error".to_string()),
		fee: resource.fee.clone(),
	}
}
