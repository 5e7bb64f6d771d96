//! Error types for the ledger provider

use ethers::types::{H256, U256};
use thiserror::Error;

/// Failure to turn a raw node payload into a typed value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{object} payload is not a JSON object")]
    NotAnObject { object: &'static str },

    #[error("{object} payload is missing field `{field}`")]
    MissingField {
        object: &'static str,
        field: &'static str,
    },

    #[error("{object} payload has invalid `{field}`: {reason}")]
    InvalidField {
        object: &'static str,
        field: &'static str,
        reason: String,
    },
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Main error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction is not valid: {0}")]
    Validation(String),

    #[error("{operation} is not supported by this provider")]
    Unsupported { operation: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Provider {name} is not connected")]
    NotConnected { name: String },

    #[error("RPC call {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("Block {block_id} not found")]
    BlockNotFound { block_id: String },

    #[error("Transaction {tx_hash:?} not found")]
    TransactionNotFound { tx_hash: H256 },

    #[error("Snapshot {id} not found")]
    SnapshotNotFound { id: String },

    #[error("Transaction {tx_hash:?} failed")]
    TransactionFailed { tx_hash: H256 },

    #[error("Transaction {tx_hash:?} ran out of gas (used {gas_used} of limit {gas_limit})")]
    OutOfGas {
        tx_hash: H256,
        gas_used: U256,
        gas_limit: U256,
    },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Timed out confirming {tx_hash:?}: {observed}/{required} confirmations")]
    ConfirmationTimeout {
        tx_hash: H256,
        observed: u64,
        required: u64,
    },

    #[error("Query engine error: {0}")]
    QueryEngine(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Shorthand for an unsupported fee accessor or capability
    pub fn unsupported(operation: impl Into<String>) -> Self {
        ProviderError::Unsupported {
            operation: operation.into(),
        }
    }

    /// Wrap a transport failure for the given RPC method
    pub fn rpc(method: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ProviderError::Rpc {
            method: method.into(),
            message: err.to_string(),
        }
    }

    /// Check if error is retryable by the caller
    ///
    /// This crate never retries on its own; the classification exists for callers
    /// that wrap sends or fetches in their own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Rpc { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::ConfirmationTimeout { .. }
                | ProviderError::NotConnected { .. }
        )
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
