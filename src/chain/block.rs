//! Node-agnostic block views

use crate::error::ProviderError;

use chrono::{DateTime, Utc};
use ethers::types::{H256, U256};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identifies a block by tag, number or hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    Latest,
    Earliest,
    Pending,
    Number(u64),
    Hash(H256),
}

impl From<u64> for BlockId {
    fn from(number: u64) -> Self {
        BlockId::Number(number)
    }
}

impl From<H256> for BlockId {
    fn from(hash: H256) -> Self {
        BlockId::Hash(hash)
    }
}

impl FromStr for BlockId {
    type Err = ProviderError;

    /// Accepts `latest`, `earliest`, `pending`, a decimal or `0x` hex number, or a 32-byte hash
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "latest" => return Ok(BlockId::Latest),
            "earliest" => return Ok(BlockId::Earliest),
            "pending" => return Ok(BlockId::Pending),
            _ => {}
        }

        if let Some(hex_part) = s.strip_prefix("0x") {
            if hex_part.len() == 64 {
                return hex_part
                    .parse::<H256>()
                    .map(BlockId::Hash)
                    .map_err(|e| ProviderError::InvalidArgument(format!("block hash {:?}: {}", s, e)));
            }
            return u64::from_str_radix(hex_part, 16)
                .map(BlockId::Number)
                .map_err(|e| ProviderError::InvalidArgument(format!("block number {:?}: {}", s, e)));
        }

        s.parse::<u64>()
            .map(BlockId::Number)
            .map_err(|_| ProviderError::InvalidArgument(format!("unrecognised block id {:?}", s)))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Latest => write!(f, "latest"),
            BlockId::Earliest => write!(f, "earliest"),
            BlockId::Pending => write!(f, "pending"),
            BlockId::Number(n) => write!(f, "{}", n),
            BlockId::Hash(h) => write!(f, "{:?}", h),
        }
    }
}

/// Gas figures of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockGas {
    pub gas_limit: U256,
    pub gas_used: U256,
    /// `None` before the fee market fork or on chains without one
    pub base_fee: Option<U256>,
}

/// Proof-of-work consensus figures, absent on other consensus engines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockConsensus {
    pub difficulty: Option<U256>,
    pub total_difficulty: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    #[serde(flatten)]
    pub gas_data: BlockGas,
    #[serde(flatten)]
    pub consensus_data: BlockConsensus,
    pub hash: H256,
    pub number: u64,
    pub parent_hash: H256,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl Block {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }
}
