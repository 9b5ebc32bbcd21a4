//! Notification of resources that need operator attention.

use async_trait::async_trait;
use keeper_types::FailureReport;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Webhook rejected report with status {0}")]
	Rejected(u16),
}

/// Receives one report per failed or skipped resource.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, report: &FailureReport) -> Result<(), NotifyError>;
}

/// Writes failure reports to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn notify(&self, report: &FailureReport) -> Result<(), NotifyError> {
		tracing::error!(
			run_id = %report.run_id,
			resource = %report.resource_id,
			job = %report.job,
			status = ?report.status,
			fee = ?report.fee,
			error = %report.error,
			"Resource needs attention"
		);
		Ok(())
	}
}

/// Posts failure reports as JSON to a webhook.
pub struct WebhookNotifier {
	client: reqwest::Client,
	url: String,
}

impl WebhookNotifier {
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| NotifyError::Network(e.to_string()))?;
		Ok(Self {
			client,
			url: url.into(),
		})
	}
}

#[async_trait]
impl Notifier for WebhookNotifier {
	async fn notify(&self, report: &FailureReport) -> Result<(), NotifyError> {
		let response = self
			.client
			.post(&self.url)
			.json(report)
			.send()
			.await
			.map_err(|e| NotifyError::Network(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(NotifyError::Rejected(status.as_u16()));
		}
		tracing::debug!(resource = %report.resource_id, "Failure report delivered");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use httpmock::{Method::POST, MockServer};
	use keeper_types::{Fee, JobKind, ResourceStatus};
	use serde_json::json;

	fn report() -> FailureReport {
		FailureReport {
			run_id: "run-1".to_string(),
			resource_id: "pool-a".to_string(),
			job: JobKind::Epoch,
			status: ResourceStatus::Skipped,
			error: "out of gas".to_string(),
			fee: Some(Fee::new(25_000, "uscrt", 230_000)),
		}
	}

	#[tokio::test]
	async fn test_webhook_posts_report() {
		let server = MockServer::start_async().await;
		let hook = server
			.mock_async(|when, then| {
				when.method(POST).path("/hooks/keeper").json_body_partial(
					json!({
						"resource_id": "pool-a",
						"job": "epoch",
						"status": "skipped",
						"fee": { "amount": "25000", "gas": 230000 }
					})
					.to_string(),
				);
				then.status(204);
			})
			.await;

		let notifier =
			WebhookNotifier::new(server.url("/hooks/keeper"), Duration::from_secs(5)).unwrap();
		notifier.notify(&report()).await.unwrap();
		hook.assert_async().await;
	}

	#[tokio::test]
	async fn test_webhook_error_status() {
		let server = MockServer::start_async().await;
		server
			.mock_async(|when, then| {
				when.method(POST).path("/hooks/keeper");
				then.status(500);
			})
			.await;

		let notifier =
			WebhookNotifier::new(server.url("/hooks/keeper"), Duration::from_secs(5)).unwrap();
		assert!(matches!(
			notifier.notify(&report()).await,
			Err(NotifyError::Rejected(500))
		));
	}

	#[tokio::test]
	async fn test_log_notifier_never_fails() {
		assert!(LogNotifier.notify(&report()).await.is_ok());
	}
}
