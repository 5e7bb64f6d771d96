//! Configuration management for the ledger provider
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "LEDGER_PROVIDER_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub provider: ProviderConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub confirmations: ConfirmationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Development nodes support state snapshots
    #[serde(default)]
    pub development: bool,
    #[serde(default = "default_data_folder")]
    pub data_folder: PathBuf,
    /// Tag sent along with requests to identify this client
    pub request_header: Option<String>,
    #[serde(flatten)]
    pub settings: ProviderSettings,
}

/// Per-instance connection settings, replaceable at runtime
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSettings {
    pub uri: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            uri: None,
            poll_interval_ms: default_poll_interval_ms(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

/// Partial settings applied by `update_settings`; unset fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsUpdate {
    pub uri: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub receipt_timeout_secs: Option<u64>,
}

impl ProviderSettings {
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(uri) = update.uri {
            self.uri = Some(uri);
        }
        if let Some(interval) = update.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(timeout) = update.receipt_timeout_secs {
            self.receipt_timeout_secs = timeout;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default)]
    pub ecosystem: EcosystemKind,
    pub chain_id: Option<u64>,
    /// Falls back to the chain's recommended depth when unset
    pub required_confirmations: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EcosystemKind {
    #[default]
    Ethereum,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConfirmationConfig {
    #[serde(default = "default_nonce_poll_interval_ms")]
    pub nonce_poll_interval_ms: u64,
    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,
    /// No deadline when unset
    pub timeout_secs: Option<u64>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            nonce_poll_interval_ms: default_nonce_poll_interval_ms(),
            block_poll_interval_ms: default_block_poll_interval_ms(),
            timeout_secs: None,
        }
    }
}

fn default_data_folder() -> PathBuf {
    PathBuf::from(".ledger-provider")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

fn default_nonce_poll_interval_ms() -> u64 {
    1_000
}

fn default_block_poll_interval_ms() -> u64 {
    5_000
}

impl Settings {
    /// Load settings from the file named by `LEDGER_PROVIDER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let mut settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        // An unset ${VAR} leaves an empty uri behind
        if settings.provider.settings.uri.as_deref() == Some("") {
            settings.provider.settings.uri = None;
        }

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.provider.name.trim().is_empty() {
            anyhow::bail!("Provider name must not be empty");
        }
        if self.network.name.trim().is_empty() {
            anyhow::bail!("Network name must not be empty");
        }

        match self.provider.settings.uri.as_deref() {
            Some(uri) if !(uri.starts_with("http://") || uri.starts_with("https://")) => {
                anyhow::bail!("Provider uri {} must be an http(s) endpoint", uri);
            }
            Some(_) => {}
            None => tracing::warn!(
                "Provider {} has no uri configured - connect will fail",
                self.provider.name
            ),
        }

        if self.provider.settings.poll_interval_ms == 0
            || self.confirmations.nonce_poll_interval_ms == 0
            || self.confirmations.block_poll_interval_ms == 0
        {
            anyhow::bail!("Poll intervals must be greater than zero");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

    re.replace_all(input, |cap: &regex::Captures| {
        env::var(&cap[1]).unwrap_or_default()
    })
    .into_owned()
}
