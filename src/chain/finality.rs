//! Confirmation tracking for included transactions
//!
//! A receipt is confirmed in two sequential phases:
//! - Nonce settle: the sender's account nonce must move past the receipt's nonce,
//!   proving the node has applied the transaction to account state
//! - Depth confirm: the latest block must be at least `required_confirmations`
//!   blocks ahead of the receipt's block
//!
//! Both phases poll through the provider and sleep on the tokio clock between
//! polls, so dropping the future cancels the wait at the next suspension point.

use super::block::BlockId;
use super::provider::Provider;
use crate::config::ConfirmationConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::metrics;
use crate::tx::Receipt;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives `(confirmations, required)` on every depth poll
pub trait ProgressSink: Send + Sync {
    fn report(&self, confirmations: u64, required: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn report(&self, confirmations: u64, required: u64) {
        self(confirmations, required)
    }
}

/// Renders progress as `Confirmations (x/y)` log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, confirmations: u64, required: u64) {
        info!("Confirmations ({}/{})", confirmations.min(required), required);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SettlingNonce,
    Confirming { last: Option<u64> },
    Final(u64),
}

/// Waits for receipts to reach their required confirmation depth
#[derive(Clone)]
pub struct ConfirmationTracker {
    nonce_poll_interval: Duration,
    block_poll_interval: Duration,
    sink: Arc<dyn ProgressSink>,
}

impl fmt::Debug for ConfirmationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationTracker")
            .field("nonce_poll_interval", &self.nonce_poll_interval)
            .field("block_poll_interval", &self.block_poll_interval)
            .finish_non_exhaustive()
    }
}

impl Default for ConfirmationTracker {
    fn default() -> Self {
        Self::new(&ConfirmationConfig::default())
    }
}

impl ConfirmationTracker {
    pub fn new(config: &ConfirmationConfig) -> Self {
        Self {
            nonce_poll_interval: Duration::from_millis(config.nonce_poll_interval_ms),
            block_poll_interval: Duration::from_millis(config.block_poll_interval_ms),
            sink: Arc::new(LogProgress),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_intervals(mut self, nonce_poll: Duration, block_poll: Duration) -> Self {
        self.nonce_poll_interval = nonce_poll;
        self.block_poll_interval = block_poll;
        self
    }

    /// Wait until `receipt` has its required confirmations
    ///
    /// Returns the confirmation count observed when the wait finished. There is
    /// no internal deadline; see [`ConfirmationTracker::wait_with_timeout`].
    pub async fn wait(&self, provider: &dyn Provider, receipt: &Receipt) -> ProviderResult<u64> {
        let mut observed = 0;
        self.run(provider, receipt, &mut observed).await
    }

    /// Like [`ConfirmationTracker::wait`] but gives up after `limit`
    pub async fn wait_with_timeout(
        &self,
        provider: &dyn Provider,
        receipt: &Receipt,
        limit: Duration,
    ) -> ProviderResult<u64> {
        let mut observed = 0;
        let outcome = tokio::time::timeout(limit, self.run(provider, receipt, &mut observed)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Gave up waiting for {:?} after {:?} ({}/{} confirmations)",
                    receipt.tx_hash, limit, observed, receipt.required_confirmations
                );
                Err(ProviderError::ConfirmationTimeout {
                    tx_hash: receipt.tx_hash,
                    observed,
                    required: receipt.required_confirmations,
                })
            }
        }
    }

    async fn run(
        &self,
        provider: &dyn Provider,
        receipt: &Receipt,
        observed: &mut u64,
    ) -> ProviderResult<u64> {
        let network = provider.network().name.clone();
        let required = receipt.required_confirmations;
        let mut phase = Phase::SettlingNonce;

        loop {
            phase = match phase {
                Phase::SettlingNonce => {
                    let nonce = provider.get_nonce(receipt.sender).await?;
                    metrics::record_confirmation_poll(&network, "nonce");

                    if nonce == receipt.nonce {
                        debug!(
                            "Nonce of {:?} still at {}, waiting for {:?}",
                            receipt.sender, nonce, receipt.tx_hash
                        );
                        tokio::time::sleep(self.nonce_poll_interval).await;
                        Phase::SettlingNonce
                    } else if required == 0 {
                        Phase::Final(0)
                    } else {
                        Phase::Confirming { last: None }
                    }
                }
                Phase::Confirming { last } => {
                    let latest = provider.get_block(BlockId::Latest).await?;
                    metrics::record_confirmation_poll(&network, "depth");

                    let confirmations = latest.number.saturating_sub(receipt.block_number);
                    *observed = confirmations;

                    if let Some(previous) = last {
                        if confirmations < previous {
                            warn!(
                                "Confirmations of {:?} dropped from {} to {}, possible reorganisation",
                                receipt.tx_hash, previous, confirmations
                            );
                        }
                    }

                    self.sink.report(confirmations, required);

                    if confirmations >= required {
                        Phase::Final(confirmations)
                    } else {
                        tokio::time::sleep(self.block_poll_interval).await;
                        Phase::Confirming {
                            last: Some(confirmations),
                        }
                    }
                }
                Phase::Final(confirmations) => {
                    info!(
                        "Transaction {:?} confirmed on {} ({} confirmations)",
                        receipt.tx_hash, network, confirmations
                    );
                    return Ok(confirmations);
                }
            };
        }
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 17000 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80002 => 32,
        // Rollups inherit L1 safety
        42161 | 421614 | 10 | 11155420 | 8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Local development nodes mine on demand
        1337 | 31337 => 0,
        _ => 64,
    }
}
