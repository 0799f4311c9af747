//! HTTP API for health checks, swap status and order intake
//!
//! This is the coordinator-side surface of the backend boundary: the backend
//! submits newly-signed orders here and polls swap status (including the
//! needs-attention flag) back to its own clients.

use crate::chain::ChainManager;
use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::OrderId;
use crate::store::StateStore;
use crate::swap::engine::SwapEngine;
use crate::swap::machine::SwapState;
use crate::swap::order::{NewSwapOrder, SwapOrder};
use crate::vault::Secret;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SwapEngine>,
    pub store: Arc<dyn StateStore>,
    pub chains: Arc<ChainManager>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    engine: Arc<SwapEngine>,
    store: Arc<dyn StateStore>,
    chains: Arc<ChainManager>,
) -> RelayerResult<()> {
    let state = AppState {
        engine,
        store,
        chains,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/swaps", get(list_swaps).post(submit_swap))
        .route("/swaps/:id", get(get_swap))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify store and chain connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();

    let chain_health = state.chains.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if store_ok && chains_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: store_ok && chains_ok,
            store: store_ok,
            chains: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Relayer status and swap statistics
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.store.stats().await.unwrap_or_default();
    let chain_health = state.chains.health_check().await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_chains: state.chains.connected_chains(),
        chain_status: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
        swaps: stats,
    })
}

#[derive(Deserialize)]
struct ListQuery {
    state: Option<String>,
}

/// List non-archived swaps, optionally filtered by state
async fn list_swaps(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = match query.state.as_deref() {
        Some(s) => match SwapState::parse(s) {
            Some(parsed) => Some(parsed),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("unknown state: {}", s) })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    match state.store.list_orders(filter).await {
        Ok(orders) => {
            let swaps: Vec<SwapResponse> = orders.iter().map(SwapResponse::from).collect();
            Json(swaps).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Get one swap by order id
async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let order_id = match parse_order_id(&id) {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    // Prefer the live record; fall back to the store for terminal orders
    if let Some(order) = state.engine.get_order(&order_id).await {
        return Json(SwapResponse::from(&order)).into_response();
    }

    match state.store.get_order(&order_id).await {
        Ok(Some(order)) => Json(SwapResponse::from(&order)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "swap not found" })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Submit a new swap order
async fn submit_swap(
    State(state): State<AppState>,
    Json(request): Json<SubmitSwapRequest>,
) -> impl IntoResponse {
    let (new_order, secret) = match request.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    match state.engine.submit_order(new_order, secret).await {
        Ok(order_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "order_id": format!("0x{}", hex::encode(order_id)) })),
        )
            .into_response(),
        Err(e @ RelayerError::OrderRejected(_)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

fn parse_order_id(s: &str) -> RelayerResult<OrderId> {
    let raw = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RelayerError::OrderRejected(format!("invalid order id: {}", e)))?;
    if raw.len() != 32 {
        return Err(RelayerError::OrderRejected(format!(
            "order id must be 32 bytes, got {}",
            raw.len()
        )));
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&raw);
    Ok(id)
}

fn parse_bytes32(field: &str, s: &str) -> RelayerResult<[u8; 32]> {
    let raw = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RelayerError::OrderRejected(format!("invalid {}: {}", field, e)))?;
    if raw.len() != 32 {
        return Err(RelayerError::OrderRejected(format!(
            "{} must be 32 bytes, got {}",
            field,
            raw.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&raw);
    Ok(out)
}

// Request/response types

#[derive(Deserialize)]
struct SubmitSwapRequest {
    order_id: String,
    source_chain: u64,
    dest_chain: u64,
    hashlock: String,
    /// Preimage the coordinator will reveal; held by the vault, never echoed
    secret: String,
    source_escrow: String,
    dest_escrow: String,
    maker_amount: String,
    taker_amount: String,
    timeout_source: u64,
    timeout_dest: u64,
}

impl SubmitSwapRequest {
    fn into_parts(self) -> RelayerResult<(NewSwapOrder, Secret)> {
        let order = NewSwapOrder {
            order_id: parse_bytes32("order_id", &self.order_id)?,
            source_chain: self.source_chain,
            dest_chain: self.dest_chain,
            hashlock: parse_bytes32("hashlock", &self.hashlock)?,
            source_escrow: self.source_escrow,
            dest_escrow: self.dest_escrow,
            maker_amount: U256::from_dec_str(&self.maker_amount)
                .map_err(|e| RelayerError::OrderRejected(format!("invalid maker amount: {}", e)))?,
            taker_amount: U256::from_dec_str(&self.taker_amount)
                .map_err(|e| RelayerError::OrderRejected(format!("invalid taker amount: {}", e)))?,
            timeout_source: self.timeout_source,
            timeout_dest: self.timeout_dest,
        };
        let secret = Secret::from_hex(&self.secret)?;
        Ok((order, secret))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    connected_chains: Vec<u64>,
    chain_status: Vec<ChainHealth>,
    swaps: crate::store::SwapStats,
}

#[derive(Serialize)]
struct LegStatus {
    funded_at: Option<u64>,
    claimed_at: Option<u64>,
    refunded_at: Option<u64>,
}

#[derive(Serialize)]
struct SwapResponse {
    order_id: String,
    source_chain: u64,
    dest_chain: u64,
    state: String,
    source_leg: LegStatus,
    dest_leg: LegStatus,
    timeout_source: u64,
    timeout_dest: u64,
    maker_amount: String,
    taker_amount: String,
    needs_attention: bool,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<&SwapOrder> for SwapResponse {
    fn from(order: &SwapOrder) -> Self {
        Self {
            order_id: format!("0x{}", order.id_hex()),
            source_chain: order.source_chain,
            dest_chain: order.dest_chain,
            state: order.state.as_str().to_string(),
            source_leg: LegStatus {
                funded_at: order.source_leg.funded_at,
                claimed_at: order.source_leg.claimed_at,
                refunded_at: order.source_leg.refunded_at,
            },
            dest_leg: LegStatus {
                funded_at: order.dest_leg.funded_at,
                claimed_at: order.dest_leg.claimed_at,
                refunded_at: order.dest_leg.refunded_at,
            },
            timeout_source: order.timeout_source,
            timeout_dest: order.timeout_dest,
            maker_amount: order.maker_amount.to_string(),
            taker_amount: order.taker_amount.to_string(),
            needs_attention: order.needs_attention
                || order.state == SwapState::Inconsistent,
            last_error: order.last_error.clone(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}
