//! Ledger provider operator tool
//!
//! Connects to the configured node, reports its fee market and health, and
//! optionally follows a transaction until it reaches the configured depth.

use anyhow::{Context, Result};
use ethers::types::H256;
use tokio::signal;
use tracing::{debug, info, warn};

use ledger_provider::chain::Provider;
use ledger_provider::{metrics, ProviderError, Settings, Web3Provider};

const LOG_FORMAT_ENV: &str = "LEDGER_PROVIDER_LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting ledger-provider v{}", env!("CARGO_PKG_VERSION"));

    let tx_hash = std::env::args()
        .nth(1)
        .map(|raw| raw.parse::<H256>())
        .transpose()
        .context("Argument must be a 0x-prefixed transaction hash")?;

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for provider {} on network {}",
        settings.provider.name, settings.network.name
    );

    let mut provider = Web3Provider::from_settings(&settings);
    let data_folder = provider.ensure_data_folder()?;
    info!("Using data folder {:?}", data_folder);

    let name = provider.name().to_string();
    provider
        .connect()
        .await
        .with_context(|| format!("Failed to connect provider {}", name))?;

    report(&provider).await?;

    if let Some(hash) = tx_hash {
        let required = provider.network().required_confirmations;
        let required = i64::try_from(required).context("Confirmation count out of range")?;

        tokio::select! {
            outcome = provider.get_transaction(hash, required) => {
                let receipt = outcome?;
                info!(
                    "{} included in block {} with status {:?}",
                    receipt, receipt.block_number, receipt.status
                );
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, abandoning wait for {:?}", hash);
            }
        }
    }

    provider.disconnect().await?;

    match metrics::render() {
        Ok(text) => debug!("Metrics at shutdown:\n{}", text),
        Err(e) => warn!("Failed to render metrics: {}", e),
    }

    info!("ledger-provider stopped");
    Ok(())
}

async fn report(provider: &Web3Provider) -> Result<()> {
    info!("Chain id: {}", provider.chain_id().await?);
    info!("Gas price: {}", provider.gas_price().await?);

    match provider.base_fee().await {
        Ok(base_fee) => info!("Base fee: {}", base_fee),
        Err(ProviderError::Unsupported { .. }) => warn!("Base fee is not supported on this network"),
        Err(e) => return Err(e.into()),
    }

    match provider.priority_fee().await {
        Ok(tip) => info!("Priority fee: {}", tip),
        Err(ProviderError::Unsupported { .. }) => warn!("Priority fee is not supported on this node"),
        Err(e) => return Err(e.into()),
    }

    if provider.health_check().await {
        info!("Provider {} is healthy", provider.name());
    } else {
        warn!("Provider {} failed its health check", provider.name());
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger_provider=debug,hyper=warn"));

    let json = wants_json_logs(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(false)))
        .with((!json).then(|| fmt::layer().with_target(true).with_thread_ids(true)))
        .init();
}

/// One JSON object per line when the log format is `json`
fn wants_json_logs(format: Option<&str>) -> bool {
    format.map_or(false, |format| format.trim().eq_ignore_ascii_case("json"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
