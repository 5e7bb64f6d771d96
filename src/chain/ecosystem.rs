//! Backend-specific decoding of raw node payloads
//!
//! Nodes disagree on field names and units, so each backend family supplies an
//! [`Ecosystem`] that turns raw JSON into the normalized [`Block`] and [`Receipt`]
//! views. Optional fields decode to `None`; missing mandatory fields are a
//! [`DecodeError`], never a default value.

use super::block::{Block, BlockConsensus, BlockGas};
use super::finality::recommended_confirmations;
use crate::config::{EcosystemKind, NetworkConfig};
use crate::error::{DecodeError, DecodeResult};
use crate::tx::{Receipt, TransactionStatus};

use ethers::types::{Address, Log, H256, U256};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Decoders for one family of ledger nodes
pub trait Ecosystem: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn decode_block_gas(&self, raw: &Value) -> DecodeResult<BlockGas>;

    fn decode_block_consensus(&self, raw: &Value) -> DecodeResult<BlockConsensus>;

    fn decode_block(&self, raw: &Value) -> DecodeResult<Block>;

    fn decode_log(&self, raw: &Value) -> DecodeResult<Log>;

    /// Decode a receipt from the node's receipt merged over its transaction payload
    ///
    /// The returned receipt is not yet bound to a provider; see [`Receipt::bind`].
    fn decode_receipt(&self, raw: &Value) -> DecodeResult<Receipt>;
}

/// Standard Ethereum JSON-RPC shapes (camelCase names, hex quantities)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ethereum;

impl Ecosystem for Ethereum {
    fn name(&self) -> &str {
        "ethereum"
    }

    fn decode_block_gas(&self, raw: &Value) -> DecodeResult<BlockGas> {
        let obj = object(raw, "block")?;
        Ok(BlockGas {
            gas_limit: quantity(obj, "block", "gasLimit")?,
            gas_used: quantity(obj, "block", "gasUsed")?,
            base_fee: opt_quantity(obj, "block", "baseFeePerGas")?,
        })
    }

    fn decode_block_consensus(&self, raw: &Value) -> DecodeResult<BlockConsensus> {
        let obj = object(raw, "block")?;
        Ok(BlockConsensus {
            difficulty: opt_quantity(obj, "block", "difficulty")?,
            total_difficulty: opt_quantity(obj, "block", "totalDifficulty")?,
        })
    }

    fn decode_block(&self, raw: &Value) -> DecodeResult<Block> {
        let obj = object(raw, "block")?;
        Ok(Block {
            gas_data: self.decode_block_gas(raw)?,
            consensus_data: self.decode_block_consensus(raw)?,
            hash: hash(obj, "block", "hash")?,
            number: small_quantity(obj, "block", "number")?,
            parent_hash: hash(obj, "block", "parentHash")?,
            size: small_quantity(obj, "block", "size")?,
            timestamp: small_quantity(obj, "block", "timestamp")?,
        })
    }

    fn decode_log(&self, raw: &Value) -> DecodeResult<Log> {
        object(raw, "log")?;
        serde_json::from_value::<Log>(raw.clone()).map_err(|e| DecodeError::InvalidField {
            object: "log",
            field: "log",
            reason: e.to_string(),
        })
    }

    fn decode_receipt(&self, raw: &Value) -> DecodeResult<Receipt> {
        let obj = object(raw, "receipt")?;

        let tx_hash = match present(obj, "transactionHash") {
            Some(_) => hash(obj, "receipt", "transactionHash")?,
            None => hash(obj, "receipt", "hash")?,
        };

        let status = match small_quantity(obj, "receipt", "status")? {
            0 => TransactionStatus::Failing,
            1 => TransactionStatus::NoError,
            other => {
                return Err(DecodeError::InvalidField {
                    object: "receipt",
                    field: "status",
                    reason: format!("unknown status {}", other),
                })
            }
        };

        // Nodes report the paid price as effectiveGasPrice; older ones only echo the tx gasPrice
        let gas_price = match opt_quantity(obj, "receipt", "effectiveGasPrice")? {
            Some(price) => price,
            None => quantity(obj, "receipt", "gasPrice")?,
        };

        let logs = match present(obj, "logs") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|entry| self.decode_log(entry))
                .collect::<DecodeResult<Vec<_>>>()?,
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    object: "receipt",
                    field: "logs",
                    reason: "expected an array".to_string(),
                })
            }
            None => Vec::new(),
        };

        Ok(Receipt {
            provider: String::new(),
            tx_hash,
            status,
            block_number: small_quantity(obj, "receipt", "blockNumber")?,
            gas_used: quantity(obj, "receipt", "gasUsed")?,
            gas_price,
            logs,
            contract_address: opt_address(obj, "receipt", "contractAddress")?,
            required_confirmations: 0,
            sender: address(obj, "receipt", "from")?,
            nonce: small_quantity(obj, "receipt", "nonce")?,
        })
    }
}

/// The network a provider is bound to
#[derive(Debug, Clone)]
pub struct Network {
    pub name: String,
    /// Expected chain id, checked on connect when set
    pub chain_id: Option<u64>,
    /// Confirmations used when a transaction does not ask for its own
    pub required_confirmations: u64,
    pub ecosystem: Arc<dyn Ecosystem>,
}

impl Network {
    pub fn new(name: impl Into<String>, ecosystem: Arc<dyn Ecosystem>) -> Self {
        Self {
            name: name.into(),
            chain_id: None,
            required_confirmations: 0,
            ecosystem,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_required_confirmations(mut self, confirmations: u64) -> Self {
        self.required_confirmations = confirmations;
        self
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        let ecosystem: Arc<dyn Ecosystem> = match config.ecosystem {
            EcosystemKind::Ethereum => Arc::new(Ethereum),
        };
        let required_confirmations = config
            .required_confirmations
            .or_else(|| config.chain_id.map(recommended_confirmations))
            .unwrap_or(0);

        Self {
            name: config.name.clone(),
            chain_id: config.chain_id,
            required_confirmations,
            ecosystem,
        }
    }
}

fn object<'a>(raw: &'a Value, object: &'static str) -> DecodeResult<&'a Map<String, Value>> {
    raw.as_object().ok_or(DecodeError::NotAnObject { object })
}

/// A field counts as absent when missing or JSON null
fn present<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    object: &'static str,
    field: &'static str,
) -> DecodeResult<&'a Value> {
    present(obj, field).ok_or(DecodeError::MissingField { object, field })
}

fn parse_quantity(value: &Value, object: &'static str, field: &'static str) -> DecodeResult<U256> {
    let invalid = |reason: String| DecodeError::InvalidField {
        object,
        field,
        reason,
    };

    match value {
        Value::String(s) => match s.strip_prefix("0x") {
            Some("") => Ok(U256::zero()),
            Some(digits) => U256::from_str_radix(digits, 16).map_err(|e| invalid(e.to_string())),
            None => U256::from_dec_str(s).map_err(|e| invalid(e.to_string())),
        },
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| invalid(format!("{} is not an unsigned integer", n))),
        other => Err(invalid(format!("expected a quantity, got {}", other))),
    }
}

fn quantity(obj: &Map<String, Value>, object: &'static str, field: &'static str) -> DecodeResult<U256> {
    parse_quantity(required(obj, object, field)?, object, field)
}

fn opt_quantity(
    obj: &Map<String, Value>,
    object: &'static str,
    field: &'static str,
) -> DecodeResult<Option<U256>> {
    present(obj, field)
        .map(|v| parse_quantity(v, object, field))
        .transpose()
}

fn small_quantity(obj: &Map<String, Value>, object: &'static str, field: &'static str) -> DecodeResult<u64> {
    let value = quantity(obj, object, field)?;
    if value > U256::from(u64::MAX) {
        return Err(DecodeError::InvalidField {
            object,
            field,
            reason: format!("{} does not fit in 64 bits", value),
        });
    }
    Ok(value.as_u64())
}

fn hex_str<'a>(value: &'a Value, object: &'static str, field: &'static str, bytes: usize) -> DecodeResult<&'a str> {
    let s = value.as_str().ok_or_else(|| DecodeError::InvalidField {
        object,
        field,
        reason: format!("expected a hex string, got {}", value),
    })?;
    match s.strip_prefix("0x") {
        Some(digits) if digits.len() == bytes * 2 => Ok(digits),
        _ => Err(DecodeError::InvalidField {
            object,
            field,
            reason: format!("expected 0x-prefixed {} bytes, got {:?}", bytes, s),
        }),
    }
}

fn hash(obj: &Map<String, Value>, object: &'static str, field: &'static str) -> DecodeResult<H256> {
    let digits = hex_str(required(obj, object, field)?, object, field, 32)?;
    digits.parse::<H256>().map_err(|e| DecodeError::InvalidField {
        object,
        field,
        reason: e.to_string(),
    })
}

fn parse_address(value: &Value, object: &'static str, field: &'static str) -> DecodeResult<Address> {
    let digits = hex_str(value, object, field, 20)?;
    digits.parse::<Address>().map_err(|e| DecodeError::InvalidField {
        object,
        field,
        reason: e.to_string(),
    })
}

fn address(obj: &Map<String, Value>, object: &'static str, field: &'static str) -> DecodeResult<Address> {
    parse_address(required(obj, object, field)?, object, field)
}

fn opt_address(
    obj: &Map<String, Value>,
    object: &'static str,
    field: &'static str,
) -> DecodeResult<Option<Address>> {
    present(obj, field)
        .map(|v| parse_address(v, object, field))
        .transpose()
}
