//! Transaction receipts and their outcome checks

use super::transaction::Transaction;
use crate::chain::finality::ConfirmationTracker;
use crate::chain::provider::Provider;
use crate::error::{ProviderError, ProviderResult};

use ethers::types::{Address, Log, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution outcome reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Failing = 0,
    NoError = 1,
}

/// A node's record of an included transaction
///
/// A failing status is a normal, inspectable outcome: use [`Receipt::ran_out_of_gas`]
/// or [`Receipt::raise_for_status`] to turn it into a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    /// Name of the provider that produced this receipt
    pub provider: String,
    pub tx_hash: H256,
    pub status: TransactionStatus,
    pub block_number: u64,
    pub gas_used: U256,
    /// Price per gas actually paid
    pub gas_price: U256,
    /// Emitted logs in execution order
    pub logs: Vec<Log>,
    /// Set only for contract creation
    pub contract_address: Option<Address>,
    pub required_confirmations: u64,
    pub sender: Address,
    pub nonce: u64,
}

impl Receipt {
    /// Associate a decoded receipt with the provider and depth it will be confirmed against
    pub fn bind(mut self, provider: &str, required_confirmations: u64) -> Self {
        self.provider = provider.to_string();
        self.required_confirmations = required_confirmations;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::NoError
    }

    /// True when the transaction failed after consuming exactly its gas limit
    pub fn ran_out_of_gas(&self, gas_limit: U256) -> bool {
        self.status == TransactionStatus::Failing && self.gas_used == gas_limit
    }

    /// Turn a failing status into an error carrying enough context to diagnose it
    pub fn raise_for_status(&self, tx: &Transaction) -> ProviderResult<()> {
        if self.is_success() {
            return Ok(());
        }

        match tx.gas_limit() {
            Some(gas_limit) if self.ran_out_of_gas(gas_limit) => Err(ProviderError::OutOfGas {
                tx_hash: self.tx_hash,
                gas_used: self.gas_used,
                gas_limit,
            }),
            _ => Err(ProviderError::TransactionFailed {
                tx_hash: self.tx_hash,
            }),
        }
    }

    /// Wait until the receipt has the required number of confirmations
    ///
    /// Dropping the returned future abandons the wait; the receipt can be awaited again.
    pub async fn await_confirmations(
        self,
        provider: &dyn Provider,
        tracker: &ConfirmationTracker,
    ) -> ProviderResult<Self> {
        tracker.wait(provider, &self).await?;
        Ok(self)
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Receipt {:?}>", self.tx_hash)
    }
}
