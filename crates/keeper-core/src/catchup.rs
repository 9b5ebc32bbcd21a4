//! Epoch catch-up.
//!
//! The ledger advances a resource's epoch by exactly one per call, while the
//! target epoch follows wall-clock time and may be several steps ahead. Each
//! step runs through the retry loop with a small attempt cap; a step that
//! cannot be completed skips the resource for the rest of the run.

use crate::retry::{CallError, IdempotentCall, RetryLoop};
use async_trait::async_trait;
use keeper_types::{Fee, LogEntry, SignedTransaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub const DEFAULT_MAX_RETRIES_PER_STEP: u32 = 3;

/// A resource whose epoch counter the keeper advances.
#[async_trait]
pub trait EpochResource: Send + Sync {
	fn id(&self) -> &str;

	/// Reads the current on-ledger epoch.
	async fn read_epoch(&self) -> Result<u64, CallError>;

	/// Builds the transaction advancing the epoch to `next`.
	async fn build_advance(&self, next: u64, fee: &Fee) -> Result<SignedTransaction, CallError>;
}

/// One resource of a catch-up batch.
pub struct CatchUpTarget<'a> {
	pub resource: &'a dyn EpochResource,
	pub expected: u64,
	/// Epoch already read by the caller, if any.
	pub current: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CatchUpReport {
	/// `None` when the epoch could not be read at all.
	pub final_counter: Option<u64>,
	pub skipped: bool,
	/// Steps completed in this run.
	pub advanced: u64,
	pub fee: Fee,
	pub error: Option<String>,
	pub log: Vec<LogEntry>,
}

/// Advancing a resource to one specific epoch.
struct AdvanceStep<'a> {
	resource: &'a dyn EpochResource,
	next: u64,
}

#[async_trait]
impl IdempotentCall for AdvanceStep<'_> {
	fn label(&self) -> String {
		format!("advance {} to epoch {}", self.resource.id(), self.next)
	}

	async fn build(&self, fee: &Fee) -> Result<SignedTransaction, CallError> {
		self.resource.build_advance(self.next, fee).await
	}

	async fn is_satisfied(&self) -> Result<bool, CallError> {
		Ok(self.resource.read_epoch().await? >= self.next)
	}
}

pub struct EpochCatchUp {
	retry: Arc<RetryLoop>,
	max_retries_per_step: u32,
	step_delay: Duration,
}

impl EpochCatchUp {
	pub fn new(retry: Arc<RetryLoop>, max_retries_per_step: u32, step_delay: Duration) -> Self {
		Self {
			retry,
			max_retries_per_step: max_retries_per_step.max(1),
			step_delay,
		}
	}

	/// Advances `resource` one step at a time until it reaches `expected`.
	#[instrument(skip_all, fields(resource = %resource.id(), expected = expected))]
	pub async fn catch_up(
		&self,
		resource: &dyn EpochResource,
		expected: u64,
		known_current: Option<u64>,
		fee: Fee,
	) -> CatchUpReport {
		let mut log = Vec::new();
		let mut fee = fee;

		let mut current = match known_current {
			Some(current) => current,
			None => match resource.read_epoch().await {
				Ok(current) => current,
				Err(e) => {
					tracing::warn!(error = %e, "Could not read epoch, skipping resource");
					log.push(LogEntry::now(format!("epoch read failed: {}", e)));
					return CatchUpReport {
						final_counter: None,
						skipped: true,
						advanced: 0,
						fee,
						error: Some(e.to_string()),
						log,
					};
				},
			},
		};
		log.push(LogEntry::now(format!(
			"epoch {} of {}",
			current, expected
		)));

		let mut advanced = 0;
		while current < expected {
			if advanced > 0 {
				tokio::time::sleep(self.step_delay).await;
			}
			let step = AdvanceStep {
				resource,
				next: current + 1,
			};
			let outcome = self
				.retry
				.execute(&step, fee, Some(self.max_retries_per_step))
				.await;
			fee = outcome.fee.clone();
			log.extend(outcome.log.iter().cloned());

			if !outcome.success() {
				let error = outcome
					.error
					.unwrap_or_else(|| format!("{:?}", outcome.status));
				tracing::error!(
					epoch = step.next,
					attempts = outcome.attempts,
					error = %error,
					"Step failed, skipping resource for this run"
				);
				log.push(LogEntry::now(format!(
					"skipped at epoch {}: {}",
					current, error
				)));
				return CatchUpReport {
					final_counter: Some(current),
					skipped: true,
					advanced,
					fee,
					error: Some(error),
					log,
				};
			}

			current = step.next;
			advanced += 1;
			tracing::info!(epoch = current, fee = %fee, "Epoch advanced");
			log.push(LogEntry::now(format!("advanced to epoch {}", current)));
		}

		CatchUpReport {
			final_counter: Some(current),
			skipped: false,
			advanced,
			fee,
			error: None,
			log,
		}
	}

	/// Catches up every target in order. Each resource starts from `fee`;
	/// escalation only carries across the steps of one resource.
	pub async fn catch_up_all(
		&self,
		targets: Vec<CatchUpTarget<'_>>,
		fee: Fee,
	) -> Vec<CatchUpReport> {
		let mut reports = Vec::with_capacity(targets.len());
		for target in targets {
			let report = self
				.catch_up(target.resource, target.expected, target.current, fee.clone())
				.await;
			reports.push(report);
		}
		reports
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::classify::ErrorClassifier;
	use crate::contract::advance_epoch_msg;
	use crate::testing::{base_fee, delivery, raw_tx, FakeLedger};

	struct TestEpoch {
		ledger: Arc<FakeLedger>,
		address: String,
	}

	#[async_trait]
	impl EpochResource for TestEpoch {
		fn id(&self) -> &str {
			&self.address
		}

		async fn read_epoch(&self) -> Result<u64, CallError> {
			let state = self.ledger.state.lock().unwrap();
			if state.broken_queries.contains(&self.address) {
				return Err(CallError::Query("node unavailable".to_string()));
			}
			Ok(state.epochs[&self.address])
		}

		async fn build_advance(&self, next: u64, fee: &Fee) -> Result<SignedTransaction, CallError> {
			Ok(raw_tx(&self.address, advance_epoch_msg(next), fee))
		}
	}

	fn setup(epochs: &[(&str, u64)]) -> (Arc<FakeLedger>, EpochCatchUp, Vec<TestEpoch>) {
		let ledger = FakeLedger::new();
		ledger.with_state(|s| {
			for (address, epoch) in epochs {
				s.epochs.insert(address.to_string(), *epoch);
			}
		});
		let retry = Arc::new(RetryLoop::new(delivery(&ledger), ErrorClassifier::new()));
		let catch_up = EpochCatchUp::new(retry, DEFAULT_MAX_RETRIES_PER_STEP, Duration::from_secs(1));
		let resources = epochs
			.iter()
			.map(|(address, _)| TestEpoch {
				ledger: ledger.clone(),
				address: address.to_string(),
			})
			.collect();
		(ledger, catch_up, resources)
	}

	#[tokio::test(start_paused = true)]
	async fn test_issues_exactly_one_advance_per_missing_epoch() {
		let (ledger, catch_up, resources) = setup(&[("secret1pool", 2)]);

		let report = catch_up.catch_up(&resources[0], 5, None, base_fee()).await;

		assert_eq!(report.final_counter, Some(5));
		assert!(!report.skipped);
		assert_eq!(report.advanced, 3);
		let epochs: Vec<u64> = ledger
			.sent_to("secret1pool")
			.iter()
			.map(|s| s.msg["advance_epoch"]["epoch"].as_u64().unwrap())
			.collect();
		assert_eq!(epochs, vec![3, 4, 5]);
		assert_eq!(ledger.epoch("secret1pool"), 5);
	}

	#[tokio::test(start_paused = true)]
	async fn test_up_to_date_sends_nothing() {
		let (ledger, catch_up, resources) = setup(&[("secret1pool", 7)]);

		let report = catch_up.catch_up(&resources[0], 7, Some(7), base_fee()).await;

		assert_eq!(report.final_counter, Some(7));
		assert_eq!(report.advanced, 0);
		assert_eq!(ledger.sent_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failing_resource_is_skipped_and_others_continue() {
		let (ledger, catch_up, resources) = setup(&[("secret1a", 0), ("secret1b", 1)]);
		ledger.with_state(|s| {
			s.always_abort.insert(
				"secret1a".to_string(),
				"out of gas in location: ReadFlat; gasWanted: 200000".to_string(),
			);
		});

		let targets = vec![
			CatchUpTarget {
				resource: &resources[0],
				expected: 4,
				current: None,
			},
			CatchUpTarget {
				resource: &resources[1],
				expected: 3,
				current: Some(1),
			},
		];
		let reports = catch_up.catch_up_all(targets, base_fee()).await;

		// Resource A: one step tried three times, the other three never attempted.
		assert!(reports[0].skipped);
		assert_eq!(reports[0].final_counter, Some(0));
		assert_eq!(reports[0].advanced, 0);
		let sent_a = ledger.sent_to("secret1a");
		assert_eq!(sent_a.len(), 3);
		assert!(sent_a
			.iter()
			.all(|s| s.msg["advance_epoch"]["epoch"] == 1));
		assert!(reports[0].error.as_deref().unwrap().contains("out of gas"));

		// Resource B starts again from the base fee.
		assert!(!reports[1].skipped);
		assert_eq!(reports[1].final_counter, Some(3));
		let sent_b = ledger.sent_to("secret1b");
		assert_eq!(sent_b.len(), 2);
		assert!(sent_b.iter().all(|s| s.fee == base_fee()));
		assert_eq!(reports[1].fee, base_fee());
		assert_eq!(ledger.epoch("secret1b"), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unreadable_epoch_skips() {
		let (ledger, catch_up, resources) = setup(&[("secret1pool", 0)]);
		ledger.with_state(|s| {
			s.broken_queries.insert("secret1pool".to_string());
		});

		let report = catch_up.catch_up(&resources[0], 3, None, base_fee()).await;

		assert!(report.skipped);
		assert_eq!(report.final_counter, None);
		assert_eq!(ledger.sent_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_stale_counter_does_not_resend() {
		let (ledger, catch_up, resources) = setup(&[("secret1pool", 3)]);

		// The caller believes the epoch is 1; the ledger is already at 3.
		let report = catch_up.catch_up(&resources[0], 4, Some(1), base_fee()).await;

		assert_eq!(report.final_counter, Some(4));
		assert_eq!(report.advanced, 3);
		let sent = ledger.sent_to("secret1pool");
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].msg["advance_epoch"]["epoch"], 4);
	}
}
