//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Exchange order outcomes by phase
//! - Transaction submissions
//! - Phase latency and event-query retries

use crate::error::{ExchangeError, ExchangeResult};
use crate::state::Phase;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "fusion_exchange_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    // Order metrics
    pub static ref ORDERS_CREATED: CounterVec = register_counter_vec!(
        "fusion_exchange_orders_created_total",
        "Total exchange orders accepted for filling",
        &[]
    ).unwrap();

    pub static ref ORDERS_COMPLETED: CounterVec = register_counter_vec!(
        "fusion_exchange_orders_completed_total",
        "Total exchange orders with both escrows withdrawn",
        &[]
    ).unwrap();

    pub static ref ORDERS_FAILED: CounterVec = register_counter_vec!(
        "fusion_exchange_orders_failed_total",
        "Total exchange orders failed, by phase",
        &["phase"]
    ).unwrap();

    pub static ref PHASE_LATENCY: HistogramVec = register_histogram_vec!(
        "fusion_exchange_phase_latency_seconds",
        "Time spent in each exchange phase",
        &["phase"],
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "fusion_exchange_tx_submitted_total",
        "Total confirmed resolver transactions",
        &["chain_id", "action"]
    ).unwrap();

    pub static ref EVENT_QUERY_RETRIES: CounterVec = register_counter_vec!(
        "fusion_exchange_event_query_retries_total",
        "Deployment event lookups retried because the log was not yet visible",
        &[]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "fusion_exchange_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "fusion_exchange_health_check_failure_total",
        "Total failed health checks",
        &[]
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

    pub async fn run(&self) -> ExchangeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ExchangeError::Config(format!("cannot bind metrics port {addr}: {e}")))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ExchangeError::Internal(format!("metrics server stopped: {e}")))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_order_created() {
    ORDERS_CREATED.with_label_values(&[]).inc();
}

pub fn record_order_completed() {
    ORDERS_COMPLETED.with_label_values(&[]).inc();
}

pub fn record_order_failed(phase: Phase) {
    ORDERS_FAILED.with_label_values(&[phase.as_str()]).inc();
}

pub fn record_phase_latency(phase: Phase, elapsed: Duration) {
    PHASE_LATENCY
        .with_label_values(&[phase.as_str()])
        .observe(elapsed.as_secs_f64());
}

pub fn record_tx_submitted(chain_id: u64, action: &str) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), action])
        .inc();
}

pub fn record_event_query_retry() {
    EVENT_QUERY_RETRIES.with_label_values(&[]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
