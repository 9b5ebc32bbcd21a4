//! Error classes assigned to rejected transactions.

use serde::{Deserialize, Serialize};

/// Classification of a raw log or transport error message.
///
/// The class decides how the retry loop proceeds with the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
	/// The effect is already in place; equivalent to success.
	AlreadySatisfied,
	/// The declared fee amount was too low.
	InsufficientFee,
	/// The gas budget ran out during execution.
	OutOfGas,
	/// Signature, sequence or timeout problems; retry unchanged.
	Transient,
	/// Anything else; the call will not succeed by retrying.
	Fatal,
}

impl ErrorClass {
	/// Returns true when another attempt may succeed.
	pub fn is_recoverable(&self) -> bool {
		matches!(
			self,
			ErrorClass::InsufficientFee | ErrorClass::OutOfGas | ErrorClass::Transient
		)
	}
}
