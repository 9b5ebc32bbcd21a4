//! Batched read engine.
//!
//! Splits a list of contract queries into fixed-size chunks, runs the chunks
//! through the aggregator with a bounded number in flight, and reassembles the
//! answers in request order.

use crate::{ContractQuerier, DeliveryError};
use futures::stream::{self, StreamExt};
use keeper_types::{BatchItem, MultiCallResult};
use std::sync::Arc;
use tracing::instrument;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 2;

pub struct MultiCallBatcher {
	querier: Arc<dyn ContractQuerier>,
	batch_size: usize,
	concurrency: usize,
}

impl MultiCallBatcher {
	pub fn new(querier: Arc<dyn ContractQuerier>) -> Self {
		Self::with_limits(querier, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY)
	}

	/// Zero limits are raised to one.
	pub fn with_limits(
		querier: Arc<dyn ContractQuerier>,
		batch_size: usize,
		concurrency: usize,
	) -> Self {
		Self {
			querier,
			batch_size: batch_size.max(1),
			concurrency: concurrency.max(1),
		}
	}

	/// Runs all `requests` and returns one result per request, in request order.
	///
	/// Item-level errors come back as `MultiCallResult::Error` in their slot.
	/// A chunk whose round trip fails fails the whole call.
	#[instrument(skip_all, fields(requests = requests.len()))]
	pub async fn batch(
		&self,
		requests: &[BatchItem],
	) -> Result<Vec<MultiCallResult>, DeliveryError> {
		let mut results: Vec<Option<MultiCallResult>> = vec![None; requests.len()];
		let batch_size = self.batch_size;
		let querier = &self.querier;

		let mut chunks = stream::iter(requests.chunks(batch_size).enumerate())
			.map(|(chunk_idx, chunk)| async move {
				let answers = querier.aggregate(chunk).await;
				(chunk_idx, chunk.len(), answers)
			})
			.buffer_unordered(self.concurrency);

		while let Some((chunk_idx, expected, answers)) = chunks.next().await {
			let answers = answers.map_err(|e| {
				tracing::warn!(chunk = chunk_idx, error = %e, "Multicall chunk failed");
				e
			})?;
			if answers.len() != expected {
				return Err(DeliveryError::InvalidResponse(format!(
					"chunk {} returned {} results for {} queries",
					chunk_idx,
					answers.len(),
					expected
				)));
			}

			let offset = chunk_idx * batch_size;
			for (i, answer) in answers.into_iter().enumerate() {
				results[offset + i] = Some(answer);
			}
		}

		results
			.into_iter()
			.enumerate()
			.map(|(i, slot)| {
				slot.ok_or_else(|| {
					DeliveryError::InvalidResponse(format!("missing result for query {}", i))
				})
			})
			.collect()
	}
}
