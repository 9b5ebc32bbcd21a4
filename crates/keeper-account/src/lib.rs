//! Account management module for the keeper system.
//!
//! This module provides the signer collaborator: it holds the key material of
//! the account that pays for and authorizes every state-changing call, and turns
//! a `SignRequest` into a broadcast-ready `SignedTransaction`.

use async_trait::async_trait;
use keeper_types::{ImplementationRegistry, SignRequest, SignedTransaction};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for account implementations.
///
/// Implementations never talk to the ledger; account number and sequence
/// arrive in the request.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Retrieves the on-ledger address of this account.
	async fn address(&self) -> Result<String, AccountError>;

	/// Signs the messages and fee of `request` into a broadcastable transaction.
	async fn sign(&self, request: &SignRequest) -> Result<SignedTransaction, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
///
/// Returns a vector of (name, factory) tuples for all available account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
///
/// Wraps an underlying account implementation.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Retrieves the address associated with the managed account.
	pub async fn get_address(&self) -> Result<String, AccountError> {
		self.implementation.address().await
	}

	/// Signs a request using the managed account.
	pub async fn sign(&self, request: &SignRequest) -> Result<SignedTransaction, AccountError> {
		self.implementation.sign(request).await
	}
}
