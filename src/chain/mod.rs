//! Chain module - node access, payload decoding and confirmation tracking
//!
//! This module provides:
//! - The `Provider` contract with optional test and upstream capabilities
//! - A JSON-RPC reference provider over a pluggable `LedgerClient`
//! - Backend-specific decoding of blocks, receipts and logs
//! - Two-phase confirmation tracking with progress reporting
//! - Snapshot isolation for development nodes

pub mod block;
pub mod client;
pub mod ecosystem;
pub mod finality;
pub mod isolation;
pub mod provider;

pub use block::{Block, BlockConsensus, BlockGas, BlockId};
pub use client::{ClientFactory, EthersClient, EthersConnector, LedgerClient};
pub use ecosystem::{Ecosystem, Ethereum, Network};
pub use finality::{recommended_confirmations, ConfirmationTracker, LogProgress, ProgressSink};
pub use isolation::Isolation;
pub use provider::{Provider, SnapshotId, TestProvider, UpstreamProvider, Web3Provider};

#[cfg(test)]
mod tests;
