//! Fee values attached to signed transactions.
//!
//! A `Fee` is never mutated in place. Escalation produces a new value so the
//! retry loop can thread the current fee through its state explicitly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Escalation step applied to the failing fee component, in percent.
const ESCALATION_PERCENT: u128 = 115;

/// Declared fee of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
	/// Quantity of `denom` offered, carried as a decimal string on the wire.
	#[serde(
		serialize_with = "serialize_amount",
		deserialize_with = "deserialize_amount"
	)]
	pub amount: u128,
	/// Denomination of the fee amount.
	pub denom: String,
	/// Gas budget.
	pub gas: u64,
}

impl Fee {
	pub fn new(amount: u128, denom: impl Into<String>, gas: u64) -> Self {
		Self {
			amount,
			denom: denom.into(),
			gas,
		}
	}

	/// Returns a new fee with the amount raised by 15%, rounded down.
	///
	/// The result is always strictly greater than the current amount, so small
	/// amounts where the rounded increase would be zero still move by one unit.
	pub fn escalate_amount(&self) -> Self {
		Self {
			amount: escalate(self.amount),
			denom: self.denom.clone(),
			gas: self.gas,
		}
	}

	/// Returns a new fee with the gas budget raised by 15%, rounded down.
	///
	/// The amount is left untouched.
	pub fn escalate_gas(&self) -> Self {
		Self {
			amount: self.amount,
			denom: self.denom.clone(),
			gas: escalate(u128::from(self.gas)).min(u128::from(u64::MAX)) as u64,
		}
	}
}

impl fmt::Display for Fee {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{} (gas {})", self.amount, self.denom, self.gas)
	}
}

fn escalate(value: u128) -> u128 {
	let raised = value.saturating_mul(ESCALATION_PERCENT) / 100;
	raised.max(value.saturating_add(1))
}

fn serialize_amount<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&amount.to_string())
}

fn deserialize_amount<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Amount {
		Text(String),
		Number(u64),
	}

	match Amount::deserialize(deserializer)? {
		Amount::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
		Amount::Number(n) => Ok(u128::from(n)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_escalate_amount_rounds_down() {
		let fee = Fee::new(25_000, "uscrt", 100_000);
		let next = fee.escalate_amount();
		assert_eq!(next.amount, 28_750);
		assert_eq!(next.gas, 100_000);

		// 28_750 * 1.15 = 33_062.5
		assert_eq!(next.escalate_amount().amount, 33_062);
	}

	#[test]
	fn test_escalate_gas_leaves_amount() {
		let fee = Fee::new(25_000, "uscrt", 123_457);
		let next = fee.escalate_gas();
		// 123_457 * 1.15 = 141_975.55
		assert_eq!(next.gas, 141_975);
		assert_eq!(next.amount, 25_000);
		assert_eq!(next.denom, "uscrt");
	}

	#[test]
	fn test_escalation_is_strictly_increasing() {
		let mut fee = Fee::new(1, "uscrt", 1);
		for _ in 0..20 {
			let next = fee.escalate_amount().escalate_gas();
			assert!(next.amount > fee.amount);
			assert!(next.gas > fee.gas);
			fee = next;
		}
	}

	#[test]
	fn test_escalation_does_not_mutate_original() {
		let fee = Fee::new(1_000, "uscrt", 50_000);
		let _ = fee.escalate_amount();
		let _ = fee.escalate_gas();
		assert_eq!(fee, Fee::new(1_000, "uscrt", 50_000));
	}

	#[test]
	fn test_amount_serialized_as_string() {
		let fee = Fee::new(25_000, "uscrt", 100_000);
		let json = serde_json::to_value(&fee).unwrap();
		assert_eq!(json["amount"], "25000");

		let parsed: Fee =
			serde_json::from_str(r#"{"amount": 7, "denom": "uscrt", "gas": 10}"#).unwrap();
		assert_eq!(parsed.amount, 7);
	}
}
