//! Common types module for the keeper system.
//!
//! This module defines the data model shared by every keeper component: fees,
//! signed transactions and their verdicts, multicall batches, resource records
//! and the reports a job run hands back to its persistence collaborator.

/// Signing request and account state types.
pub mod account;
/// Error classes for rejected transactions.
pub mod classify;
/// Transaction delivery types for ledger interactions.
pub mod delivery;
/// Fee values and their escalation rules.
pub mod fee;
/// Resource records and job reports.
pub mod job;
/// Batched contract query types.
pub mod multicall;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Secure string type for key material.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;

pub use account::*;
pub use classify::ErrorClass;
pub use delivery::*;
pub use fee::Fee;
pub use job::*;
pub use multicall::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::StorageKey;

/// Truncates an identifier for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}
