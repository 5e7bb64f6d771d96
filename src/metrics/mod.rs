//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Provider connection status
//! - Transaction submission and confirmation
//! - Confirmation polling per phase
//! - Development snapshots

use crate::error::{ProviderError, ProviderResult};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref PROVIDER_CONNECTED: GaugeVec = register_gauge_vec!(
        "ledger_provider_connected",
        "Provider connection status (1=connected, 0=disconnected)",
        &["provider"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "ledger_provider_transactions_submitted_total",
        "Total transactions submitted",
        &["network"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "ledger_provider_transactions_confirmed_total",
        "Total transactions that reached their required confirmations",
        &["network"]
    ).unwrap();

    pub static ref CONFIRMATION_POLLS: CounterVec = register_counter_vec!(
        "ledger_provider_confirmation_polls_total",
        "Total confirmation polls by phase",
        &["network", "phase"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "ledger_provider_confirmation_latency_seconds",
        "Time from receipt to required confirmations",
        &["network"],
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    pub static ref SNAPSHOTS: CounterVec = register_counter_vec!(
        "ledger_provider_snapshots_total",
        "Total development snapshots by action",
        &["network", "action"]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> ProviderResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ProviderError::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| ProviderError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_connection(provider: &str, connected: bool) {
    PROVIDER_CONNECTED
        .with_label_values(&[provider])
        .set(if connected { 1.0 } else { 0.0 });
}

pub fn record_tx_submitted(network: &str) {
    TX_SUBMITTED.with_label_values(&[network]).inc();
}

pub fn record_tx_confirmed(network: &str, latency_secs: f64) {
    TX_CONFIRMED.with_label_values(&[network]).inc();
    CONFIRMATION_LATENCY
        .with_label_values(&[network])
        .observe(latency_secs);
}

pub fn record_confirmation_poll(network: &str, phase: &str) {
    CONFIRMATION_POLLS.with_label_values(&[network, phase]).inc();
}

pub fn record_snapshot(network: &str, action: &str) {
    SNAPSHOTS.with_label_values(&[network, action]).inc();
}
