//! Provider contract and the JSON-RPC reference implementation
//!
//! [`Provider`] is the uniform surface the rest of the crate talks to. Optional
//! capabilities live in separate traits ([`TestProvider`], [`UpstreamProvider`])
//! and are discovered with `as_test_provider` / `as_upstream` instead of
//! downcasting.

use super::block::{Block, BlockId};
use super::client::{ClientFactory, EthersConnector, LedgerClient};
use super::ecosystem::Network;
use super::finality::ConfirmationTracker;
use crate::config::{ProviderConfig, ProviderSettings, Settings, SettingsUpdate};
use crate::error::{ProviderError, ProviderResult};
use crate::metrics;
use crate::tx::{Receipt, Transaction};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, H256, U256};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Uniform access to one ledger node
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn network(&self) -> &Network;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> ProviderResult<()>;

    async fn disconnect(&mut self) -> ProviderResult<()>;

    /// Disconnect, merge `update` into the current settings, reconnect
    async fn update_settings(&mut self, update: SettingsUpdate) -> ProviderResult<()>;

    async fn chain_id(&self) -> ProviderResult<u64>;

    async fn get_balance(&self, address: Address) -> ProviderResult<U256>;

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes>;

    async fn get_nonce(&self, address: Address) -> ProviderResult<u64>;

    /// Gas units the node expects `tx` to consume
    async fn estimate_gas_cost(&self, tx: &Transaction) -> ProviderResult<U256>;

    async fn gas_price(&self) -> ProviderResult<U256>;

    async fn priority_fee(&self) -> ProviderResult<U256> {
        Err(ProviderError::unsupported("priority_fee"))
    }

    async fn base_fee(&self) -> ProviderResult<U256> {
        Err(ProviderError::unsupported("base_fee"))
    }

    async fn get_block(&self, id: BlockId) -> ProviderResult<Block>;

    /// Execute `tx` without committing it and return the output
    async fn send_call(&self, tx: &Transaction) -> ProviderResult<Bytes>;

    /// Fetch the receipt for `hash` and wait for `required_confirmations`
    ///
    /// Negative confirmation counts are rejected before the node is contacted.
    async fn get_transaction(
        &self,
        hash: H256,
        required_confirmations: i64,
    ) -> ProviderResult<Receipt>;

    /// Submit a signed transaction and wait for its confirmations
    async fn send_transaction(&self, tx: &Transaction) -> ProviderResult<Receipt>;

    /// Logs matching `filter`, fetched when the stream is first polled
    fn get_events(&self, filter: Filter) -> BoxStream<'static, ProviderResult<Log>>;

    fn as_test_provider(&self) -> Option<&dyn TestProvider> {
        None
    }

    fn as_upstream(&self) -> Option<&dyn UpstreamProvider> {
        None
    }
}

/// Opaque handle to a saved chain state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Development nodes that can save and restore chain state
#[async_trait]
pub trait TestProvider: Send + Sync {
    async fn snapshot(&self) -> ProviderResult<SnapshotId>;

    /// Restore `id`; unknown ids fail with `SnapshotNotFound`
    async fn revert(&self, id: &SnapshotId) -> ProviderResult<()>;
}

/// Providers backed by a remote node other processes can reach
pub trait UpstreamProvider: Send + Sync {
    fn connection_str(&self) -> String;
}

/// [`Provider`] over any [`LedgerClient`]
pub struct Web3Provider {
    name: String,
    network: Network,
    config: ProviderConfig,
    factory: Arc<dyn ClientFactory>,
    client: Option<Arc<dyn LedgerClient>>,
    tracker: ConfirmationTracker,
    confirmation_timeout: Option<Duration>,
}

impl fmt::Debug for Web3Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Web3Provider")
            .field("name", &self.name)
            .field("network", &self.network.name)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

impl Web3Provider {
    pub fn new(config: ProviderConfig, network: Network, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            name: config.name.clone(),
            network,
            config,
            factory,
            client: None,
            tracker: ConfirmationTracker::default(),
            confirmation_timeout: None,
        }
    }

    /// Build a provider for the configured node using the ethers HTTP client
    pub fn from_settings(settings: &Settings) -> Self {
        let mut provider = Self::new(
            settings.provider.clone(),
            Network::from_config(&settings.network),
            Arc::new(EthersConnector),
        )
        .with_tracker(ConfirmationTracker::new(&settings.confirmations));
        provider.confirmation_timeout = settings.confirmations.timeout_secs.map(Duration::from_secs);
        provider
    }

    pub fn with_tracker(mut self, tracker: ConfirmationTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_confirmation_timeout(mut self, limit: Duration) -> Self {
        self.confirmation_timeout = Some(limit);
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.config.settings
    }

    pub fn data_folder(&self) -> &Path {
        &self.config.data_folder
    }

    pub fn request_header(&self) -> Option<&str> {
        self.config.request_header.as_deref()
    }

    /// Directory for provider-local state, created on demand
    pub fn ensure_data_folder(&self) -> ProviderResult<PathBuf> {
        let folder = self.data_folder().to_path_buf();
        std::fs::create_dir_all(&folder).map_err(|e| {
            ProviderError::Config(format!("Cannot create data folder {:?}: {}", folder, e))
        })?;
        Ok(folder)
    }

    pub fn tracker(&self) -> &ConfirmationTracker {
        &self.tracker
    }

    fn client(&self) -> ProviderResult<&Arc<dyn LedgerClient>> {
        self.client.as_ref().ok_or_else(|| ProviderError::NotConnected {
            name: self.name.clone(),
        })
    }

    /// Check that the node still serves the latest block
    pub async fn health_check(&self) -> bool {
        match self.get_block(BlockId::Latest).await {
            Ok(block) => {
                debug!("Provider {} healthy at block {}", self.name, block.number);
                true
            }
            Err(e) => {
                error!("Health check failed for provider {}: {}", self.name, e);
                false
            }
        }
    }

    async fn fetch_receipt(&self, hash: H256, required: u64) -> ProviderResult<Receipt> {
        let client = self.client()?;

        // A fresh hash may be unknown to the node until its receipt exists
        let receipt = client.wait_for_receipt(hash).await?;
        let tx = client
            .get_transaction(hash)
            .await?
            .ok_or(ProviderError::TransactionNotFound { tx_hash: hash })?;

        // Receipt fields win over the transaction payload's
        let merged = match (tx, receipt) {
            (Value::Object(mut fields), Value::Object(receipt_fields)) => {
                fields.extend(receipt_fields);
                Value::Object(fields)
            }
            (_, receipt) => receipt,
        };

        let receipt = self
            .network
            .ecosystem
            .decode_receipt(&merged)?
            .bind(&self.name, required);

        info!("Submitted {:?} (gas_used={})", receipt.tx_hash, receipt.gas_used);
        Ok(receipt)
    }

    async fn confirm(&self, hash: H256, required: u64) -> ProviderResult<Receipt> {
        let receipt = self.fetch_receipt(hash, required).await?;
        let started = Instant::now();

        let receipt = match self.confirmation_timeout {
            Some(limit) => {
                self.tracker.wait_with_timeout(self, &receipt, limit).await?;
                receipt
            }
            None => receipt.await_confirmations(self, &self.tracker).await?,
        };

        metrics::record_tx_confirmed(&self.network.name, started.elapsed().as_secs_f64());
        Ok(receipt)
    }
}

#[async_trait]
impl Provider for Web3Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn network(&self) -> &Network {
        &self.network
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> ProviderResult<()> {
        if self.client.is_some() {
            debug!("Provider {} already connected", self.name);
            return Ok(());
        }

        let client = self.factory.open(&self.config.settings)?;
        let chain_id = client.chain_id().await?;

        if let Some(expected) = self.network.chain_id {
            if expected != chain_id {
                return Err(ProviderError::Config(format!(
                    "Provider {} is on chain {} but network {} expects chain {}",
                    self.name, chain_id, self.network.name, expected
                )));
            }
        }

        self.client = Some(client);
        metrics::record_connection(&self.name, true);
        info!(
            "Provider {} connected to {} (chain {})",
            self.name, self.network.name, chain_id
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> ProviderResult<()> {
        if self.client.take().is_some() {
            metrics::record_connection(&self.name, false);
            info!("Provider {} disconnected", self.name);
        }
        Ok(())
    }

    async fn update_settings(&mut self, update: SettingsUpdate) -> ProviderResult<()> {
        self.disconnect().await?;
        self.config.settings.merge(update);
        debug!("Provider {} settings now {:?}", self.name, self.config.settings);
        self.connect().await
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        self.client()?.chain_id().await
    }

    async fn get_balance(&self, address: Address) -> ProviderResult<U256> {
        self.client()?.get_balance(address).await
    }

    async fn get_code(&self, address: Address) -> ProviderResult<Bytes> {
        self.client()?.get_code(address).await
    }

    async fn get_nonce(&self, address: Address) -> ProviderResult<u64> {
        self.client()?.get_transaction_count(address).await
    }

    async fn estimate_gas_cost(&self, tx: &Transaction) -> ProviderResult<U256> {
        self.client()?.estimate_gas(&tx.to_typed()).await
    }

    async fn gas_price(&self) -> ProviderResult<U256> {
        self.client()?.gas_price().await
    }

    async fn priority_fee(&self) -> ProviderResult<U256> {
        self.client()?
            .max_priority_fee()
            .await?
            .ok_or_else(|| ProviderError::unsupported("priority_fee"))
    }

    async fn base_fee(&self) -> ProviderResult<U256> {
        let block = self.get_block(BlockId::Latest).await?;
        block.gas_data.base_fee.ok_or_else(|| {
            warn!("Network {} reports no base fee", self.network.name);
            ProviderError::unsupported("base_fee")
        })
    }

    async fn get_block(&self, id: BlockId) -> ProviderResult<Block> {
        let raw = self
            .client()?
            .get_block(id)
            .await?
            .ok_or_else(|| ProviderError::BlockNotFound {
                block_id: id.to_string(),
            })?;
        Ok(self.network.ecosystem.decode_block(&raw)?)
    }

    async fn send_call(&self, tx: &Transaction) -> ProviderResult<Bytes> {
        tx.validate()?;
        self.client()?.call(&tx.to_typed()).await
    }

    async fn get_transaction(
        &self,
        hash: H256,
        required_confirmations: i64,
    ) -> ProviderResult<Receipt> {
        let required = u64::try_from(required_confirmations).map_err(|_| {
            ProviderError::InvalidArgument(format!(
                "required confirmations cannot be negative (got {})",
                required_confirmations
            ))
        })?;
        self.confirm(hash, required).await
    }

    async fn send_transaction(&self, tx: &Transaction) -> ProviderResult<Receipt> {
        tx.validate()?;
        if !tx.is_signed() {
            return Err(ProviderError::Validation(
                "transaction must be signed before it is sent".to_string(),
            ));
        }

        let raw = tx.encode()?;
        let hash = self.client()?.send_raw_transaction(raw).await?;
        metrics::record_tx_submitted(&self.network.name);
        debug!("Sent {:?} to {}", hash, self.network.name);

        let required = tx
            .required_confirmations()
            .unwrap_or(self.network.required_confirmations);
        self.confirm(hash, required).await
    }

    fn get_events(&self, filter: Filter) -> BoxStream<'static, ProviderResult<Log>> {
        let client = self.client().cloned();
        let ecosystem = self.network.ecosystem.clone();

        stream::once(async move { client?.get_logs(&filter).await })
            .map(move |fetched| {
                let logs: Vec<ProviderResult<Log>> = match fetched {
                    Ok(raw) => raw
                        .iter()
                        .map(|entry| ecosystem.decode_log(entry).map_err(ProviderError::from))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(logs)
            })
            .flatten()
            .boxed()
    }

    fn as_test_provider(&self) -> Option<&dyn TestProvider> {
        if self.config.development {
            Some(self)
        } else {
            None
        }
    }

    fn as_upstream(&self) -> Option<&dyn UpstreamProvider> {
        if self.config.settings.uri.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl TestProvider for Web3Provider {
    async fn snapshot(&self) -> ProviderResult<SnapshotId> {
        let id = SnapshotId::new(self.client()?.snapshot().await?);
        metrics::record_snapshot(&self.network.name, "snapshot");
        debug!("Took snapshot {} on {}", id, self.network.name);
        Ok(id)
    }

    async fn revert(&self, id: &SnapshotId) -> ProviderResult<()> {
        if !self.client()?.revert(id.as_str()).await? {
            return Err(ProviderError::SnapshotNotFound {
                id: id.to_string(),
            });
        }
        metrics::record_snapshot(&self.network.name, "revert");
        debug!("Reverted to snapshot {} on {}", id, self.network.name);
        Ok(())
    }
}

impl UpstreamProvider for Web3Provider {
    fn connection_str(&self) -> String {
        self.config.settings.uri.clone().unwrap_or_default()
    }
}
