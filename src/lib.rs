//! Ledger provider - uniform access to account-based ledger nodes
//!
//! This crate models transactions with static or dynamic fee pricing, decodes
//! node payloads into typed blocks and receipts, and waits for included
//! transactions to reach a required confirmation depth.

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod query;
pub mod tx;

#[cfg(test)]
mod test_utils;

pub use chain::{
    Block, BlockId, ConfirmationTracker, Isolation, Network, Provider, TestProvider,
    UpstreamProvider, Web3Provider,
};
pub use config::Settings;
pub use error::{DecodeError, ProviderError, ProviderResult};
pub use query::{BlockQuery, QueryEngine, QueryManager};
pub use tx::{FeeModel, Receipt, Transaction, TransactionBuilder, TransactionStatus, TransactionType};
