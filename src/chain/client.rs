//! Ledger client contract and the ethers JSON-RPC implementation
//!
//! A [`LedgerClient`] is the live session to a node. It speaks raw payloads;
//! decoding into typed views is the ecosystem's job.

use super::block::BlockId;
use crate::config::ProviderSettings;
use crate::error::{ProviderError, ProviderResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider as EthersProvider};
use ethers::types::transaction::eip2718::TypedTransaction;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Session to a ledger node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn chain_id(&self) -> ProviderResult<u64>;

    async fn gas_price(&self) -> ProviderResult<U256>;

    /// `Ok(None)` when the node has no fee market tip endpoint
    async fn max_priority_fee(&self) -> ProviderResult<Option<U256>>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ProviderResult<U256>;

    /// `Ok(None)` when the node does not know the block
    async fn get_block(&self, id: BlockId) -> ProviderResult<Option<Value>>;

    async fn get_transaction_count(&self, address: Address) -> ProviderResult<u64>;

    async fn get_balance(&self, address: Address) -> ProviderResult<U256>;

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes>;

    async fn call(&self, tx: &TypedTransaction) -> ProviderResult<Bytes>;

    /// Raw transaction payload, `Ok(None)` when unknown
    async fn get_transaction(&self, hash: H256) -> ProviderResult<Option<Value>>;

    /// Wait until the node has a receipt for the transaction
    async fn wait_for_receipt(&self, hash: H256) -> ProviderResult<Value>;

    async fn send_raw_transaction(&self, raw: Bytes) -> ProviderResult<H256>;

    async fn get_logs(&self, filter: &Filter) -> ProviderResult<Vec<Value>>;

    /// Snapshot chain state on a development node
    async fn snapshot(&self) -> ProviderResult<String>;

    /// Restore a snapshot; `Ok(false)` when the node does not know the id
    async fn revert(&self, snapshot_id: &str) -> ProviderResult<bool>;
}

/// Opens ledger sessions for a provider
pub trait ClientFactory: Send + Sync {
    fn open(&self, settings: &ProviderSettings) -> ProviderResult<Arc<dyn LedgerClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&ProviderSettings) -> ProviderResult<Arc<dyn LedgerClient>> + Send + Sync,
{
    fn open(&self, settings: &ProviderSettings) -> ProviderResult<Arc<dyn LedgerClient>> {
        self(settings)
    }
}

/// Opens [`EthersClient`] sessions over HTTP
#[derive(Debug, Clone, Copy, Default)]
pub struct EthersConnector;

impl ClientFactory for EthersConnector {
    fn open(&self, settings: &ProviderSettings) -> ProviderResult<Arc<dyn LedgerClient>> {
        Ok(Arc::new(EthersClient::new(settings)?))
    }
}

/// JSON-RPC client backed by an ethers HTTP provider
pub struct EthersClient {
    inner: EthersProvider<Http>,
    receipt_poll_interval: Duration,
    receipt_timeout: Duration,
}

impl EthersClient {
    pub fn new(settings: &ProviderSettings) -> ProviderResult<Self> {
        let uri = settings
            .uri
            .as_deref()
            .ok_or_else(|| ProviderError::Config("provider uri is not set".to_string()))?;

        let poll_interval = Duration::from_millis(settings.poll_interval_ms);
        let inner = EthersProvider::<Http>::try_from(uri)
            .map_err(|e| ProviderError::Config(format!("Invalid provider uri {}: {}", uri, e)))?
            .interval(poll_interval);

        debug!("Opened HTTP session to {}", uri);

        Ok(Self {
            inner,
            receipt_poll_interval: poll_interval,
            receipt_timeout: Duration::from_secs(settings.receipt_timeout_secs),
        })
    }

    async fn request_raw<T>(&self, method: &str, params: T) -> ProviderResult<Value>
    where
        T: serde::Serialize + Send + Sync + std::fmt::Debug,
    {
        self.inner
            .request::<T, Value>(method, params)
            .await
            .map_err(|e| ProviderError::rpc(method, e))
    }

    async fn poll_receipt(&self, hash: H256) -> ProviderResult<Value> {
        loop {
            let raw = self
                .request_raw("eth_getTransactionReceipt", [hash])
                .await?;
            let mined = raw
                .get("blockNumber")
                .map(|b| !b.is_null())
                .unwrap_or(false);
            if mined {
                return Ok(raw);
            }
            debug!("Receipt for {:?} not available yet", hash);
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

fn block_tag(id: BlockId) -> String {
    match id {
        BlockId::Latest => "latest".to_string(),
        BlockId::Earliest => "earliest".to_string(),
        BlockId::Pending => "pending".to_string(),
        BlockId::Number(n) => format!("{:#x}", n),
        BlockId::Hash(h) => format!("{:?}", h),
    }
}

/// Nodes without an endpoint answer with "method not found" style errors
fn is_missing_method(err: &ProviderError) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("method not found")
        || message.contains("does not exist")
        || message.contains("not supported")
        || message.contains("-32601")
}

/// Development nodes answer `evm_snapshot` with a hex string or a plain number
fn snapshot_id(raw: Value) -> ProviderResult<String> {
    match raw {
        Value::String(id) => Ok(id),
        Value::Number(n) => n.as_u64().map(|id| format!("{:#x}", id)).ok_or_else(|| {
            ProviderError::rpc("evm_snapshot", format!("snapshot id {} is out of range", n))
        }),
        other => Err(ProviderError::rpc(
            "evm_snapshot",
            format!("unexpected snapshot id {}", other),
        )),
    }
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

#[async_trait]
impl LedgerClient for EthersClient {
    async fn chain_id(&self) -> ProviderResult<u64> {
        self.inner
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| ProviderError::rpc("eth_chainId", e))
    }

    async fn gas_price(&self) -> ProviderResult<U256> {
        self.inner
            .get_gas_price()
            .await
            .map_err(|e| ProviderError::rpc("eth_gasPrice", e))
    }

    async fn max_priority_fee(&self) -> ProviderResult<Option<U256>> {
        match self.request_raw("eth_maxPriorityFeePerGas", ()).await {
            Ok(value) => serde_json::from_value::<U256>(value)
                .map(Some)
                .map_err(|e| ProviderError::rpc("eth_maxPriorityFeePerGas", e)),
            Err(e) if is_missing_method(&e) => {
                warn!("Node has no priority fee endpoint: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ProviderResult<U256> {
        self.inner
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ProviderError::rpc("eth_estimateGas", e))
    }

    async fn get_block(&self, id: BlockId) -> ProviderResult<Option<Value>> {
        let raw = match id {
            BlockId::Hash(_) => {
                self.request_raw("eth_getBlockByHash", (block_tag(id), false))
                    .await?
            }
            _ => {
                self.request_raw("eth_getBlockByNumber", (block_tag(id), false))
                    .await?
            }
        };
        Ok(non_null(raw))
    }

    async fn get_transaction_count(&self, address: Address) -> ProviderResult<u64> {
        self.inner
            .get_transaction_count(address, None)
            .await
            .map(|n| n.as_u64())
            .map_err(|e| ProviderError::rpc("eth_getTransactionCount", e))
    }

    async fn get_balance(&self, address: Address) -> ProviderResult<U256> {
        self.inner
            .get_balance(address, None)
            .await
            .map_err(|e| ProviderError::rpc("eth_getBalance", e))
    }

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes> {
        self.inner
            .get_code(address, None)
            .await
            .map_err(|e| ProviderError::rpc("eth_getCode", e))
    }

    async fn call(&self, tx: &TypedTransaction) -> ProviderResult<Bytes> {
        self.inner
            .call(tx, None)
            .await
            .map_err(|e| ProviderError::rpc("eth_call", e))
    }

    async fn get_transaction(&self, hash: H256) -> ProviderResult<Option<Value>> {
        let raw = self
            .request_raw("eth_getTransactionByHash", [hash])
            .await?;
        Ok(non_null(raw))
    }

    async fn wait_for_receipt(&self, hash: H256) -> ProviderResult<Value> {
        tokio::time::timeout(self.receipt_timeout, self.poll_receipt(hash))
            .await
            .map_err(|_| ProviderError::Timeout {
                operation: format!("receipt of {:?}", hash),
            })?
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ProviderResult<H256> {
        let pending = self
            .inner
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ProviderError::rpc("eth_sendRawTransaction", e))?;
        Ok(pending.tx_hash())
    }

    async fn get_logs(&self, filter: &Filter) -> ProviderResult<Vec<Value>> {
        let raw = self.request_raw("eth_getLogs", [filter]).await?;
        serde_json::from_value(raw).map_err(|e| ProviderError::rpc("eth_getLogs", e))
    }

    async fn snapshot(&self) -> ProviderResult<String> {
        let raw = self.request_raw("evm_snapshot", ()).await.map_err(|e| {
            if is_missing_method(&e) {
                ProviderError::unsupported("snapshot")
            } else {
                e
            }
        })?;
        snapshot_id(raw)
    }

    async fn revert(&self, snapshot_id: &str) -> ProviderResult<bool> {
        let raw = self
            .request_raw("evm_revert", [snapshot_id])
            .await
            .map_err(|e| {
                if is_missing_method(&e) {
                    ProviderError::unsupported("revert")
                } else {
                    e
                }
            })?;
        Ok(raw.as_bool().unwrap_or(false))
    }
}
