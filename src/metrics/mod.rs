//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and scan progress
//! - Swap lifecycle transitions
//! - Action dispatch outcomes and retries
//! - Operator alerts

use crate::error::RelayerResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "relayer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_HEIGHT: GaugeVec = register_gauge_vec!(
        "relayer_chain_height",
        "Last observed head per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref CURSOR_HEIGHT: GaugeVec = register_gauge_vec!(
        "relayer_cursor_height",
        "Last scanned block per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref WATCHER_ERRORS: CounterVec = register_counter_vec!(
        "relayer_watcher_errors_total",
        "Total watcher scan failures",
        &["chain_id"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "relayer_events_received_total",
        "Total escrow events received by type",
        &["chain_id", "event_type"]
    ).unwrap();

    // Swap metrics
    pub static ref ORDERS_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_orders_submitted_total",
        "Total swap orders accepted at intake",
        &[]
    ).unwrap();

    pub static ref SWAP_TRANSITIONS: CounterVec = register_counter_vec!(
        "relayer_swap_transitions_total",
        "Total state transitions by resulting state",
        &["state"]
    ).unwrap();

    pub static ref INVARIANT_VIOLATIONS: CounterVec = register_counter_vec!(
        "relayer_invariant_violations_total",
        "Total contradictory on-chain observations",
        &[]
    ).unwrap();

    // Action metrics
    pub static ref ACTIONS_DISPATCHED: CounterVec = register_counter_vec!(
        "relayer_actions_dispatched_total",
        "Total actions handed to the dispatcher",
        &["kind"]
    ).unwrap();

    pub static ref ACTION_OUTCOMES: CounterVec = register_counter_vec!(
        "relayer_action_outcomes_total",
        "Total action outcomes by kind",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref ACTION_RETRIES: CounterVec = register_counter_vec!(
        "relayer_action_retries_total",
        "Total submission retries",
        &["chain_id"]
    ).unwrap();

    // Alerts
    pub static ref ALERTS: CounterVec = register_counter_vec!(
        "relayer_alerts_total",
        "Total operator alerts raised by the monitoring service",
        &["kind"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "relayer_health_check_success_total",
        "Total successful health checks",
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

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::RelayerError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::RelayerError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_chain_height(chain_id: u64, height: u64) {
    CHAIN_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(height as f64);
}

pub fn record_cursor(chain_id: u64, block: u64) {
    CURSOR_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block as f64);
}

pub fn record_watcher_error(chain_id: u64) {
    WATCHER_ERRORS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_event(chain_id: u64, event_type: &str) {
    EVENTS_RECEIVED
        .with_label_values(&[&chain_id.to_string(), event_type])
        .inc();
}

pub fn record_order_submitted() {
    ORDERS_SUBMITTED.with_label_values(&[]).inc();
}

pub fn record_swap_state(state: &str) {
    SWAP_TRANSITIONS.with_label_values(&[state]).inc();
}

pub fn record_invariant_violation() {
    INVARIANT_VIOLATIONS.with_label_values(&[]).inc();
}

pub fn record_action_dispatched(kind: &str) {
    ACTIONS_DISPATCHED.with_label_values(&[kind]).inc();
}

pub fn record_action(kind: &str, outcome: &str) {
    ACTION_OUTCOMES.with_label_values(&[kind, outcome]).inc();
}

pub fn record_action_retry(chain_id: u64) {
    ACTION_RETRIES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_alert(kind: &str) {
    ALERTS.with_label_values(&[kind]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}
