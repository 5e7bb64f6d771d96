//! Run work against a development node and roll its state back afterwards

use super::provider::Provider;
use crate::error::{ProviderError, ProviderResult};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Snapshot/revert guard around a unit of work
///
/// Providers without snapshot support still run the work; the lack of
/// isolation is reported once per `Isolation` value.
#[derive(Debug, Default)]
pub struct Isolation {
    warned: AtomicBool,
}

impl Isolation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, T>(&self, provider: &dyn Provider, work: F) -> ProviderResult<T>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        let Some(test_provider) = provider.as_test_provider() else {
            self.warn_unisolated(provider.name(), "provider has no snapshot support");
            return work.await;
        };

        let snapshot = match test_provider.snapshot().await {
            Ok(id) => id,
            Err(ProviderError::Unsupported { operation }) => {
                self.warn_unisolated(provider.name(), &format!("{} is unsupported", operation));
                return work.await;
            }
            Err(e) => return Err(e),
        };

        debug!("Isolating run on {} at snapshot {}", provider.name(), snapshot);
        let outcome = work.await;
        test_provider.revert(&snapshot).await?;
        outcome
    }

    fn warn_unisolated(&self, provider: &str, reason: &str) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("Runs on {} are not isolated: {}", provider, reason);
        }
    }

    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Relaxed)
    }
}
