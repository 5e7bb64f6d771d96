//! Fee models for legacy and EIP-1559 transactions

use crate::error::{ProviderError, ProviderResult};

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction envelope type as encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Legacy fixed gas price (type `0x0`)
    Static,
    /// EIP-1559 base fee + priority fee (type `0x2`)
    Dynamic,
}

impl TransactionType {
    /// Envelope type byte
    pub fn code(&self) -> u8 {
        match self {
            TransactionType::Static => 0x0,
            TransactionType::Dynamic => 0x2,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.code())
    }
}

/// Fee fields of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeeModel {
    Static {
        gas_price: U256,
    },
    Dynamic {
        /// Per-gas fee cap
        max_fee: U256,
        /// Per-gas tip
        priority_fee: U256,
        /// Network base fee observed when the transaction was built
        #[serde(default)]
        base_fee: Option<U256>,
    },
}

impl FeeModel {
    pub fn legacy(gas_price: impl Into<U256>) -> Self {
        FeeModel::Static {
            gas_price: gas_price.into(),
        }
    }

    pub fn eip1559(max_fee: impl Into<U256>, priority_fee: impl Into<U256>) -> Self {
        FeeModel::Dynamic {
            max_fee: max_fee.into(),
            priority_fee: priority_fee.into(),
            base_fee: None,
        }
    }

    /// Attach the network base fee to a dynamic fee model
    pub fn with_base_fee(self, base_fee: U256) -> Self {
        match self {
            FeeModel::Dynamic {
                max_fee,
                priority_fee,
                ..
            } => FeeModel::Dynamic {
                max_fee,
                priority_fee,
                base_fee: Some(base_fee),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> TransactionType {
        match self {
            FeeModel::Static { .. } => TransactionType::Static,
            FeeModel::Dynamic { .. } => TransactionType::Dynamic,
        }
    }

    /// The fee a sender commits to, as exposed by `max_fee`
    ///
    /// Static transactions derive it from the gas price and limit and it cannot be
    /// changed independently. Dynamic transactions carry it as a caller-set field.
    pub fn max_fee(&self, gas_limit: U256) -> U256 {
        match self {
            FeeModel::Static { gas_price } => gas_limit.saturating_mul(*gas_price),
            FeeModel::Dynamic { max_fee, .. } => *max_fee,
        }
    }

    /// Set the fee cap of a dynamic fee model
    pub fn set_max_fee(&mut self, value: U256) -> ProviderResult<()> {
        match self {
            FeeModel::Static { .. } => Err(ProviderError::unsupported(
                "setting max_fee on a static-fee transaction",
            )),
            FeeModel::Dynamic { max_fee, .. } => {
                *max_fee = value;
                Ok(())
            }
        }
    }

    pub fn gas_price(&self) -> Option<U256> {
        match self {
            FeeModel::Static { gas_price } => Some(*gas_price),
            FeeModel::Dynamic { .. } => None,
        }
    }

    pub fn priority_fee(&self) -> Option<U256> {
        match self {
            FeeModel::Static { .. } => None,
            FeeModel::Dynamic { priority_fee, .. } => Some(*priority_fee),
        }
    }

    pub fn base_fee(&self) -> Option<U256> {
        match self {
            FeeModel::Static { .. } => None,
            FeeModel::Dynamic { base_fee, .. } => *base_fee,
        }
    }

    /// Maximum amount of wei the fees can consume for the given gas limit
    pub fn max_spend(&self, gas_limit: U256) -> U256 {
        match self {
            FeeModel::Static { gas_price } => gas_limit.saturating_mul(*gas_price),
            FeeModel::Dynamic { max_fee, .. } => gas_limit.saturating_mul(*max_fee),
        }
    }

    /// Check that the fee fields agree with each other
    pub fn check(&self) -> Result<(), String> {
        match self {
            FeeModel::Static { .. } => Ok(()),
            FeeModel::Dynamic {
                max_fee,
                priority_fee,
                ..
            } => {
                if priority_fee > max_fee {
                    return Err(format!(
                        "priority fee {} exceeds max fee {}",
                        priority_fee, max_fee
                    ));
                }
                Ok(())
            }
        }
    }
}
