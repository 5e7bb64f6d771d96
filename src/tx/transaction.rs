//! Transaction record, builder and signing payload encoding

use super::fee::{FeeModel, TransactionType};
use crate::error::{ProviderError, ProviderResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, Signature, TransactionRequest, H256, U256,
};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use std::fmt;

/// A transfer or contract call, valid from the moment it exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    chain_id: u64,
    sender: Address,
    receiver: Option<Address>,
    nonce: Option<u64>,
    value: U256,
    gas_limit: Option<U256>,
    data: Bytes,
    #[serde(flatten)]
    fee: FeeModel,
    required_confirmations: Option<u64>,
    signature: Option<Signature>,
}

impl Transaction {
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// `None` for contract creation
    pub fn receiver(&self) -> Option<Address> {
        self.receiver
    }

    /// `None` means the backend picks the next nonce
    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    /// `None` means the backend estimates the limit
    pub fn gas_limit(&self) -> Option<U256> {
        self.gas_limit
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn fee(&self) -> &FeeModel {
        &self.fee
    }

    pub fn kind(&self) -> TransactionType {
        self.fee.kind()
    }

    /// `None` means the network default applies
    pub fn required_confirmations(&self) -> Option<u64> {
        self.required_confirmations
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn max_fee(&self) -> U256 {
        self.fee.max_fee(self.gas_limit.unwrap_or_default())
    }

    /// Fails with `Unsupported` on static-fee transactions
    pub fn set_max_fee(&mut self, value: U256) -> ProviderResult<()> {
        self.fee.set_max_fee(value)
    }

    /// Maximum amount of wei the sender's balance must cover
    pub fn total_transfer_value(&self) -> U256 {
        self.value.saturating_add(self.max_fee())
    }

    /// Maximum wei the fees alone can consume
    pub fn max_spend(&self) -> U256 {
        self.fee.max_spend(self.gas_limit.unwrap_or_default())
    }

    /// Attach a signature produced by an external signer
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Structural check derived from the fields alone
    pub fn validate(&self) -> ProviderResult<()> {
        if self.sender.is_zero() {
            return Err(ProviderError::Validation(
                "sender must not be the zero address".to_string(),
            ));
        }
        if self.receiver.is_none() && self.data.is_empty() {
            return Err(ProviderError::Validation(
                "contract creation requires init code".to_string(),
            ));
        }
        if self.gas_limit == Some(U256::zero()) {
            return Err(ProviderError::Validation(
                "gas limit must be positive".to_string(),
            ));
        }
        self.fee.check().map_err(ProviderError::Validation)
    }

    /// Typed request understood by the ledger client
    pub fn to_typed(&self) -> TypedTransaction {
        match self.fee {
            FeeModel::Static { gas_price } => {
                let mut tx = TransactionRequest::new()
                    .from(self.sender)
                    .value(self.value)
                    .data(self.data.clone())
                    .gas_price(gas_price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.receiver {
                    tx = tx.to(to);
                }
                if let Some(nonce) = self.nonce {
                    tx = tx.nonce(nonce);
                }
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                TypedTransaction::Legacy(tx)
            }
            FeeModel::Dynamic {
                max_fee,
                priority_fee,
                ..
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.sender)
                    .value(self.value)
                    .data(self.data.clone())
                    .max_fee_per_gas(max_fee)
                    .max_priority_fee_per_gas(priority_fee)
                    .chain_id(self.chain_id);
                if let Some(to) = self.receiver {
                    tx = tx.to(to);
                }
                if let Some(nonce) = self.nonce {
                    tx = tx.nonce(nonce);
                }
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                TypedTransaction::Eip1559(tx)
            }
        }
    }

    /// Bytes to hash for signing, or to broadcast once signed
    pub fn encode(&self) -> ProviderResult<Bytes> {
        self.validate()?;
        let typed = self.to_typed();
        Ok(match &self.signature {
            Some(signature) => typed.rlp_signed(signature),
            None => typed.rlp(),
        })
    }

    /// Hash a signer must sign
    pub fn signing_hash(&self) -> H256 {
        self.to_typed().sighash()
    }

    /// Keccak-256 of the encoded transaction
    pub fn hash(&self) -> ProviderResult<H256> {
        let encoded = self.encode()?;
        Ok(H256::from_slice(&Keccak256::digest(&encoded)))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = if self.data.len() > 9 {
            format!(
                "0x{}...{}",
                hex::encode(&self.data[..3]),
                hex::encode(&self.data[self.data.len() - 3..])
            )
        } else {
            format!("0x{}", hex::encode(&self.data[..]))
        };

        writeln!(f, "Transaction:")?;
        writeln!(f, "  type: {}", self.kind())?;
        writeln!(f, "  chain_id: {}", self.chain_id)?;
        writeln!(f, "  sender: {:?}", self.sender)?;
        match self.receiver {
            Some(to) => writeln!(f, "  receiver: {:?}", to)?,
            None => writeln!(f, "  receiver: <contract creation>")?,
        }
        if let Some(nonce) = self.nonce {
            writeln!(f, "  nonce: {}", nonce)?;
        }
        writeln!(f, "  value: {}", self.value)?;
        if let Some(gas) = self.gas_limit {
            writeln!(f, "  gas_limit: {}", gas)?;
        }
        match self.fee {
            FeeModel::Static { gas_price } => writeln!(f, "  gas_price: {}", gas_price)?,
            FeeModel::Dynamic {
                max_fee,
                priority_fee,
                ..
            } => {
                writeln!(f, "  max_fee: {}", max_fee)?;
                writeln!(f, "  priority_fee: {}", priority_fee)?;
            }
        }
        write!(f, "  data: {}", data)
    }
}

/// Collects transaction fields and validates them in `build`
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    chain_id: u64,
    sender: Option<String>,
    receiver: Option<String>,
    nonce: Option<u64>,
    value: U256,
    gas_limit: Option<U256>,
    data: Bytes,
    fee: FeeModel,
    required_confirmations: Option<i64>,
    signature: Option<Signature>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self {
            chain_id: 0,
            sender: None,
            receiver: None,
            nonce: None,
            value: U256::zero(),
            gas_limit: None,
            data: Bytes::default(),
            fee: FeeModel::legacy(0u64),
            required_confirmations: None,
            signature: None,
        }
    }
}

impl TransactionBuilder {
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = value.into();
        self
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn fee(mut self, fee: FeeModel) -> Self {
        self.fee = fee;
        self
    }

    pub fn required_confirmations(mut self, confirmations: i64) -> Self {
        self.required_confirmations = Some(confirmations);
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn build(self) -> ProviderResult<Transaction> {
        let sender = match self.sender {
            Some(raw) => parse_address("sender", &raw)?,
            None => {
                return Err(ProviderError::Validation(
                    "sender is required".to_string(),
                ))
            }
        };
        let receiver = self
            .receiver
            .map(|raw| parse_address("receiver", &raw))
            .transpose()?;

        let required_confirmations = match self.required_confirmations {
            Some(n) if n < 0 => {
                return Err(ProviderError::Validation(format!(
                    "required confirmations cannot be negative (got {})",
                    n
                )))
            }
            Some(n) => Some(n as u64),
            None => None,
        };

        let tx = Transaction {
            chain_id: self.chain_id,
            sender,
            receiver,
            nonce: self.nonce,
            value: self.value,
            gas_limit: self.gas_limit,
            data: self.data,
            fee: self.fee,
            required_confirmations,
            signature: self.signature,
        };
        tx.validate()?;
        Ok(tx)
    }
}

/// Parse a `0x`-prefixed, 20-byte hex address
fn parse_address(field: &str, raw: &str) -> ProviderResult<Address> {
    let hex_part = raw.strip_prefix("0x").ok_or_else(|| {
        ProviderError::Validation(format!("{} address {:?} must be 0x-prefixed", field, raw))
    })?;
    if hex_part.len() != 40 {
        return Err(ProviderError::Validation(format!(
            "{} address {:?} must be 20 bytes",
            field, raw
        )));
    }
    hex_part
        .parse::<Address>()
        .map_err(|e| ProviderError::Validation(format!("{} address {:?}: {}", field, raw, e)))
}
