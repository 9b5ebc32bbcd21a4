//! The epoch and vest jobs.

use super::KeeperEngine;
use crate::catchup::{CatchUpReport, CatchUpTarget, EpochCatchUp};
use crate::contract::{epoch_query, parse_epoch, ContractResource};
use crate::retry::{CallOutcome, CallStatus};
use chrono::Utc;
use keeper_types::{BatchItem, Fee, JobKind, LogEntry, ResourceReport, ResourceStatus};

impl KeeperEngine {
	/// Brings every epoch resource to its calendar-day target.
	pub(super) async fn epoch_job(
		&self,
		resources: &[ContractResource],
		fee: &Fee,
	) -> Vec<ResourceReport> {
		let resources: Vec<&ContractResource> = resources
			.iter()
			.filter(|r| r.record().runs(JobKind::Epoch))
			.collect();
		if resources.is_empty() {
			return Vec::new();
		}

		let now = Utc::now();
		let current = self.read_epochs(&resources).await;

		let mut reports = Vec::with_capacity(resources.len());
		let mut pending = Vec::new();
		for (resource, current) in resources.iter().zip(current) {
			let expected = resource.record().elapsed_days(now);
			match current {
				Some(current) if current >= expected => {
					tracing::debug!(resource = %resource.record().id, epoch = current, "Epoch up to date");
					reports.push(ResourceReport {
						resource_id: resource.record().id.clone(),
						job: JobKind::Epoch,
						status: ResourceStatus::UpToDate,
						final_counter: Some(current),
						fee: None,
						error: None,
						log: vec![LogEntry::now(format!(
							"epoch {} of {}, nothing to do",
							current, expected
						))],
					});
				},
				current => pending.push((*resource, expected, current)),
			}
		}

		let catch_up = EpochCatchUp::new(
			self.retry.clone(),
			self.config.max_retries_per_step,
			self.config.step_delay,
		);
		let targets = pending
			.iter()
			.map(|(resource, expected, current)| CatchUpTarget {
				resource: *resource,
				expected: *expected,
				current: *current,
			})
			.collect();
		let results = catch_up.catch_up_all(targets, fee.clone()).await;

		for ((resource, _, _), result) in pending.iter().zip(results) {
			reports.push(epoch_report(&resource.record().id, result));
		}
		reports
	}

	/// Reads all epochs through the batcher. A failed round trip or an item
	/// error leaves the counter unknown; catch-up then reads it itself.
	async fn read_epochs(&self, resources: &[&ContractResource]) -> Vec<Option<u64>> {
		let items: Vec<BatchItem> = resources
			.iter()
			.map(|r| {
				BatchItem::new(
					r.record().contract_address.clone(),
					r.record().code_hash.clone(),
					epoch_query(),
				)
			})
			.collect();

		match self.batcher.batch(&items).await {
			Ok(results) => results
				.iter()
				.zip(resources)
				.map(|(result, resource)| match result.data().map(parse_epoch) {
					Some(Ok(epoch)) => Some(epoch),
					Some(Err(e)) => {
						tracing::warn!(resource = %resource.record().id, error = %e, "Bad epoch answer");
						None
					},
					None => {
						tracing::warn!(
							resource = %resource.record().id,
							error = result.error().unwrap_or_default(),
							"Epoch query failed"
						);
						None
					},
				})
				.collect(),
			Err(e) => {
				tracing::warn!(error = %e, "Bulk epoch read failed, reading one by one");
				vec![None; resources.len()]
			},
		}
	}

	/// Releases unlocked funds of every vesting resource, each call starting
	/// from `fee`.
	pub(super) async fn vest_job(
		&self,
		resources: &[ContractResource],
		fee: &Fee,
	) -> Vec<ResourceReport> {
		let mut reports = Vec::new();
		for resource in resources.iter().filter(|r| r.record().runs(JobKind::Vest)) {
			let outcome = self
				.retry
				.execute(&resource.vest(), fee.clone(), self.config.vest_max_attempts)
				.await;
			reports.push(vest_report(&resource.record().id, outcome));
		}
		reports
	}
}

fn epoch_report(resource_id: &str, result: CatchUpReport) -> ResourceReport {
	let status = if result.skipped {
		ResourceStatus::Skipped
	} else {
		ResourceStatus::Succeeded
	};
	ResourceReport {
		resource_id: resource_id.to_string(),
		job: JobKind::Epoch,
		status,
		final_counter: result.final_counter,
		fee: Some(result.fee),
		error: result.error,
		log: result.log,
	}
}

fn vest_report(resource_id: &str, outcome: CallOutcome) -> ResourceReport {
	let status = match outcome.status {
		CallStatus::AlreadySatisfied if outcome.attempts == 0 => ResourceStatus::UpToDate,
		CallStatus::AlreadySatisfied | CallStatus::Committed => ResourceStatus::Succeeded,
		CallStatus::Rejected | CallStatus::Exhausted => ResourceStatus::Failed,
	};
	let fee = (outcome.attempts > 0).then_some(outcome.fee);
	ResourceReport {
		resource_id: resource_id.to_string(),
		job: JobKind::Vest,
		status,
		final_counter: None,
		fee,
		error: outcome.error,
		log: outcome.log,
	}
}
