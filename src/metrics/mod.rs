//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submitted transfers and approvals
//! - Indexer polling outcomes
//! - Settlement results and latency

use crate::error::{TransferError, TransferResult};
use crate::settlement::SettlementState;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "hubroute_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS_SUBMITTED: CounterVec = register_counter_vec!(
        "hubroute_transfers_submitted_total",
        "Transfers whose action transaction was broadcast, by kind",
        &["kind"]
    ).unwrap();

    pub static ref APPROVALS: CounterVec = register_counter_vec!(
        "hubroute_approvals_total",
        "Allowance checks by chain and outcome (sent, skipped)",
        &["chain_id", "outcome"]
    ).unwrap();

    pub static ref INCLUSION_LATENCY: HistogramVec = register_histogram_vec!(
        "hubroute_inclusion_latency_seconds",
        "Time from broadcast to confirmed inclusion",
        &["chain_id"],
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Settlement metrics
    pub static ref INDEXER_POLLS: CounterVec = register_counter_vec!(
        "hubroute_indexer_polls_total",
        "Indexer lookups by outcome (empty, record, error)",
        &["outcome"]
    ).unwrap();

    pub static ref SETTLEMENTS: CounterVec = register_counter_vec!(
        "hubroute_settlements_total",
        "Tracked transfers that reached a terminal state",
        &["state"]
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: HistogramVec = register_histogram_vec!(
        "hubroute_settlement_latency_seconds",
        "Time from tracking start to terminal state",
        &["state"],
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 3600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> TransferResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransferError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TransferError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Current registry in the text exposition format
pub fn render() -> TransferResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TransferError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TransferError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_transfer_submitted(kind: &str) {
    TRANSFERS_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_approval(chain_id: u64, sent: bool) {
    APPROVALS
        .with_label_values(&[&chain_id.to_string(), if sent { "sent" } else { "skipped" }])
        .inc();
}

pub fn record_inclusion_latency(chain_id: u64, latency_secs: f64) {
    INCLUSION_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_indexer_poll(outcome: &str) {
    INDEXER_POLLS.with_label_values(&[outcome]).inc();
}

pub fn record_settlement(state: SettlementState, latency_secs: f64) {
    SETTLEMENTS.with_label_values(&[state.as_str()]).inc();
    SETTLEMENT_LATENCY
        .with_label_values(&[state.as_str()])
        .observe(latency_secs);
}
