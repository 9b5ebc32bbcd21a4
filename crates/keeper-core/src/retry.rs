//! Fee-adaptive retry loop for idempotent state-changing calls.
//!
//! The transport verdict of a single submission is advisory. Whether the
//! call's effect is in place is decided by the call's own state check, which
//! runs before the first attempt, after every commit and after every failed
//! attempt.

use crate::classify::ErrorClassifier;
use async_trait::async_trait;
use keeper_delivery::DeliveryService;
use keeper_types::{ErrorClass, Fee, LogEntry, SignedTransaction, TxVerdict};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Delay between two attempts of the same call.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors raised while preparing or verifying a call.
#[derive(Debug, Error)]
pub enum CallError {
	#[error("Signing error: {0}")]
	Signing(String),
	#[error("Account error: {0}")]
	Account(String),
	#[error("Query error: {0}")]
	Query(String),
}

/// A logical state change that may be submitted any number of times.
#[async_trait]
pub trait IdempotentCall: Send + Sync {
	/// Short description used in logs.
	fn label(&self) -> String;

	/// Builds and signs a transaction carrying the call at `fee`.
	async fn build(&self, fee: &Fee) -> Result<SignedTransaction, CallError>;

	/// Returns true when the call's effect is already in place on the ledger.
	async fn is_satisfied(&self) -> Result<bool, CallError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
	/// The effect was in place; may or may not have needed a transaction.
	AlreadySatisfied,
	/// A transaction of this loop put the effect in place.
	Committed,
	/// The ledger rejected the call with an error retrying cannot fix.
	Rejected,
	/// The attempt cap was reached.
	Exhausted,
}

/// Result of `RetryLoop::execute`.
#[derive(Debug, Clone)]
pub struct CallOutcome {
	pub status: CallStatus,
	/// Fee of the last attempt, or the escalated fee for the next one when
	/// the loop gave up.
	pub fee: Fee,
	pub attempts: u32,
	pub error: Option<String>,
	pub log: Vec<LogEntry>,
}

impl CallOutcome {
	pub fn success(&self) -> bool {
		matches!(
			self.status,
			CallStatus::AlreadySatisfied | CallStatus::Committed
		)
	}
}

/// Mutable state of one `execute` invocation.
#[derive(Debug, Clone)]
pub struct RetryState {
	pub fee: Fee,
	/// `None` retries until the call succeeds or is rejected.
	pub attempts_left: Option<u32>,
	pub last_error: Option<String>,
}

impl RetryState {
	pub fn new(fee: Fee, max_attempts: Option<u32>) -> Self {
		Self {
			fee,
			attempts_left: max_attempts,
			last_error: None,
		}
	}

	/// Takes one attempt from the budget; false when none is left.
	fn take_attempt(&mut self) -> bool {
		match self.attempts_left.as_mut() {
			Some(0) => false,
			Some(left) => {
				*left -= 1;
				true
			},
			None => true,
		}
	}

	/// Applies the escalation that `class` calls for.
	fn escalate(&mut self, class: ErrorClass) -> bool {
		match class {
			ErrorClass::InsufficientFee => {
				self.fee = self.fee.escalate_amount();
				true
			},
			ErrorClass::OutOfGas => {
				self.fee = self.fee.escalate_gas();
				true
			},
			_ => false,
		}
	}
}

/// Runs idempotent calls to completion through `DeliveryService`.
///
/// At most one transaction is in flight per loop, and callers run loops for
/// the same signer one after another.
pub struct RetryLoop {
	delivery: Arc<DeliveryService>,
	classifier: ErrorClassifier,
	retry_delay: Duration,
}

impl RetryLoop {
	pub fn new(delivery: Arc<DeliveryService>, classifier: ErrorClassifier) -> Self {
		Self {
			delivery,
			classifier,
			retry_delay: DEFAULT_RETRY_DELAY,
		}
	}

	pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
		self.retry_delay = retry_delay;
		self
	}

	pub fn classifier(&self) -> &ErrorClassifier {
		&self.classifier
	}

	#[instrument(skip_all, fields(call = %call.label()))]
	pub async fn execute(
		&self,
		call: &dyn IdempotentCall,
		fee: Fee,
		max_attempts: Option<u32>,
	) -> CallOutcome {
		let mut state = RetryState::new(fee, max_attempts);
		let mut log = Vec::new();
		let mut attempts = 0u32;

		if self.satisfied(call, &mut log).await {
			tracing::info!("Effect already in place, nothing sent");
			log.push(LogEntry::now("effect already in place"));
			return finish(CallStatus::AlreadySatisfied, state, attempts, log);
		}

		loop {
			if attempts > 0 {
				tokio::time::sleep(self.retry_delay).await;
			}
			if !state.take_attempt() {
				// An earlier submission may have landed late.
				if attempts > 0 && self.satisfied(call, &mut log).await {
					log.push(LogEntry::now("effect in place before giving up"));
					return finish(CallStatus::Committed, state, attempts, log);
				}
				tracing::error!(
					attempts,
					error = state.last_error.as_deref().unwrap_or_default(),
					"Attempt budget exhausted"
				);
				log.push(LogEntry::now(format!(
					"gave up after {} attempts",
					attempts
				)));
				return finish(CallStatus::Exhausted, state, attempts, log);
			}
			attempts += 1;
			let fee = state.fee.clone();
			log.push(LogEntry::now(format!("attempt {} at fee {}", attempts, fee)));

			let tx = match call.build(&fee).await {
				Ok(tx) => tx,
				Err(e) => {
					tracing::warn!(attempt = attempts, error = %e, "Failed to build transaction");
					log.push(LogEntry::now(format!("build failed: {}", e)));
					state.last_error = Some(e.to_string());
					continue;
				},
			};

			match self.delivery.submit_and_confirm(&tx).await {
				Ok(TxVerdict::Committed(_)) => {
					if self.satisfied(call, &mut log).await {
						log.push(LogEntry::now("committed"));
						state.fee = fee;
						return finish(CallStatus::Committed, state, attempts, log);
					}
					tracing::warn!(attempt = attempts, "Transaction committed without effect");
					log.push(LogEntry::now("committed without effect"));
					state.last_error = Some("committed without effect".to_string());
				},
				Ok(TxVerdict::Aborted(raw_log)) => {
					let class = self.classifier.classify(&raw_log);
					log.push(LogEntry::now(format!(
						"aborted ({:?}): {}",
						class, raw_log
					)));
					if class == ErrorClass::AlreadySatisfied {
						tracing::info!(raw_log = %raw_log, "Ledger reports effect already in place");
						state.fee = fee;
						return finish(CallStatus::AlreadySatisfied, state, attempts, log);
					}
					state.last_error = Some(raw_log);

					// The effect may have landed despite the abort.
					if self.satisfied(call, &mut log).await {
						log.push(LogEntry::now("effect in place despite abort"));
						state.fee = fee;
						return finish(CallStatus::Committed, state, attempts, log);
					}
					if !class.is_recoverable() {
						tracing::error!(
							error = state.last_error.as_deref().unwrap_or_default(),
							"Call rejected"
						);
						return finish(CallStatus::Rejected, state, attempts, log);
					}
					if state.escalate(class) {
						tracing::info!(class = ?class, fee = %state.fee, "Escalated fee");
						log.push(LogEntry::now(format!("escalated fee to {}", state.fee)));
					}
				},
				Ok(TxVerdict::Pending) => {
					state.last_error = Some("verdict still pending".to_string());
					if self.satisfied(call, &mut log).await {
						state.fee = fee;
						return finish(CallStatus::Committed, state, attempts, log);
					}
				},
				Err(e) => {
					let message = e.to_string();
					let class = self.classifier.classify(&message);
					tracing::warn!(
						attempt = attempts,
						ambiguous = e.is_ambiguous(),
						error = %message,
						"Submission failed"
					);
					log.push(LogEntry::now(format!("transport error: {}", message)));
					state.last_error = Some(message);

					if e.is_ambiguous() && self.satisfied(call, &mut log).await {
						log.push(LogEntry::now("effect in place despite transport error"));
						state.fee = fee;
						return finish(CallStatus::Committed, state, attempts, log);
					}
					if state.escalate(class) {
						log.push(LogEntry::now(format!("escalated fee to {}", state.fee)));
					}
				},
			}
		}
	}

	/// Runs the state check; a failing check counts as not satisfied.
	async fn satisfied(&self, call: &dyn IdempotentCall, log: &mut Vec<LogEntry>) -> bool {
		match call.is_satisfied().await {
			Ok(satisfied) => satisfied,
			Err(e) => {
				tracing::warn!(error = %e, "State check failed");
				log.push(LogEntry::now(format!("state check failed: {}", e)));
				false
			},
		}
	}
}

fn finish(status: CallStatus, state: RetryState, attempts: u32, log: Vec<LogEntry>) -> CallOutcome {
	let error = match status {
		CallStatus::Rejected | CallStatus::Exhausted => state.last_error,
		_ => None,
	};
	CallOutcome {
		status,
		fee: state.fee,
		attempts,
		error,
		log,
	}
}
