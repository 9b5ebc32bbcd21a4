//! Core keeper engine.
//!
//! This module ties the ledger collaborators together into the transaction
//! reliability engine: error classification, the fee-adaptive retry loop, the
//! epoch catch-up loop and the jobs that drive them for every resource.

pub mod builder;
pub mod catchup;
pub mod classify;
pub mod contract;
pub mod engine;
pub mod notify;
pub mod retry;
pub mod tx;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{BuilderError, KeeperBuilder, KeeperFactories};
pub use catchup::{CatchUpReport, CatchUpTarget, EpochCatchUp, EpochResource};
pub use classify::ErrorClassifier;
pub use engine::{EngineConfig, EngineError, KeeperEngine};
pub use notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
pub use retry::{CallError, CallOutcome, CallStatus, IdempotentCall, RetryLoop, RetryState};
pub use tx::TxFactory;
