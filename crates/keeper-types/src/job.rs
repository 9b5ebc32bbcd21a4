//! Resource records and the reports produced by a job run.

use crate::Fee;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Jobs the keeper can drive for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
	/// Advance the on-ledger epoch counter to its wall-clock target.
	Epoch,
	/// Release unlocked vesting funds.
	Vest,
}

impl JobKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobKind::Epoch => "epoch",
			JobKind::Vest => "vest",
		}
	}
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A contract the keeper looks after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
	/// Stable identity used as the persistence key.
	pub id: String,
	pub contract_address: String,
	pub code_hash: String,
	/// Creation time; the epoch target counts calendar days from here.
	pub created_at: DateTime<Utc>,
	#[serde(default = "default_jobs")]
	pub jobs: Vec<JobKind>,
}

fn default_jobs() -> Vec<JobKind> {
	vec![JobKind::Epoch]
}

impl ResourceRecord {
	pub fn runs(&self, job: JobKind) -> bool {
		self.jobs.contains(&job)
	}

	/// Number of calendar days (UTC) elapsed between creation and `now`.
	///
	/// Returns zero when `now` lies before the creation date.
	pub fn elapsed_days(&self, now: DateTime<Utc>) -> u64 {
		let days = (now.date_naive() - self.created_at.date_naive()).num_days();
		u64::try_from(days).unwrap_or(0)
	}
}

/// One line of the human-readable trail attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
	pub timestamp: DateTime<Utc>,
	pub message: String,
}

impl LogEntry {
	pub fn now(message: impl Into<String>) -> Self {
		Self {
			timestamp: Utc::now(),
			message: message.into(),
		}
	}
}

/// Final state of one resource within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
	/// The required calls landed.
	Succeeded,
	/// Nothing had to be sent.
	UpToDate,
	/// The per-resource circuit breaker tripped; other resources continued.
	Skipped,
	/// The ledger rejected the call or its budget ran out.
	Failed,
}

/// Outcome of one job for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
	pub resource_id: String,
	pub job: JobKind,
	pub status: ResourceStatus,
	#[serde(default)]
	pub final_counter: Option<u64>,
	/// Last fee used for this resource.
	#[serde(default)]
	pub fee: Option<Fee>,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub log: Vec<LogEntry>,
}

impl ResourceReport {
	pub fn needs_attention(&self) -> bool {
		matches!(self.status, ResourceStatus::Skipped | ResourceStatus::Failed)
	}
}

/// Result of a single `run_once`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
	pub run_id: String,
	pub keeper_id: String,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub resources: Vec<ResourceReport>,
}

impl JobReport {
	fn count(&self, status: ResourceStatus) -> usize {
		self.resources.iter().filter(|r| r.status == status).count()
	}

	pub fn succeeded(&self) -> usize {
		self.count(ResourceStatus::Succeeded) + self.count(ResourceStatus::UpToDate)
	}

	pub fn skipped(&self) -> usize {
		self.count(ResourceStatus::Skipped)
	}

	pub fn failed(&self) -> usize {
		self.count(ResourceStatus::Failed)
	}
}

/// Last observed on-ledger counter of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
	pub counter: u64,
	/// Run that observed the value.
	pub run_id: String,
	pub updated_at: DateTime<Utc>,
}

/// Structured report handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
	pub run_id: String,
	pub resource_id: String,
	pub job: JobKind,
	pub status: ResourceStatus,
	pub error: String,
	pub fee: Option<Fee>,
}
