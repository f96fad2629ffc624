//! HTTP API for the exchange: fills, secret reveals, order lookup and health

use crate::config::ApiConfig;
use crate::coordination::{ExchangeOrchestrator, FillRequest, RevealRequest};
use crate::error::{ExchangeError, ExchangeResult};
use crate::resolver::EscrowSide;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ExchangeOrchestrator>,
}

/// Routes with tracing and CORS layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/order", post(submit_fill))
        .route("/order/secret-reveal", post(reveal_secret))
        .route("/order/:id", get(get_order).delete(delete_order))
        .route("/order/:id/cancel", post(cancel_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, orchestrator: Arc<ExchangeOrchestrator>) -> ExchangeResult<()> {
    let app = router(AppState { orchestrator });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ExchangeError::Config(format!("cannot bind API address {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| ExchangeError::Internal(format!("API server stopped: {e}")))?;

    Ok(())
}

/// `ExchangeError` rendered as `{status, message, error}`
pub struct ApiError(ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        Self(err)
    }
}

pub fn status_code(err: &ExchangeError) -> StatusCode {
    match err {
        ExchangeError::OrderNotFound { .. } => StatusCode::NOT_FOUND,
        ExchangeError::InvalidStateTransition { .. }
        | ExchangeError::ConcurrentUpdate { .. }
        | ExchangeError::WindowClosed { .. } => StatusCode::CONFLICT,
        // the request named the chain
        ExchangeError::UnknownChainConfig { .. } | ExchangeError::Signature(_) => StatusCode::BAD_REQUEST,
        _ => match err.class() {
            "validation" => StatusCode::BAD_REQUEST,
            "chain_call" | "event_not_found" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        let body = ErrorResponse {
            status: "error".to_string(),
            message: self.0.to_string(),
            error: self.0.class().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store and every chain RPC
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store_ok, chain_health) = match state.orchestrator.ready().await {
        Ok(chains) => (true, chains),
        Err(_) => (false, Vec::new()),
    };
    let chains_ok = !chain_health.is_empty() && chain_health.iter().all(|(_, healthy)| *healthy);

    let response = ReadinessResponse {
        ready: store_ok && chains_ok,
        store: store_ok,
        chains: chains_ok,
        details: chain_health
            .into_iter()
            .map(|(id, h)| ChainHealth {
                chain_id: id,
                healthy: h,
            })
            .collect(),
    };

    if response.ready {
        crate::metrics::record_health_check();
        (StatusCode::OK, Json(response))
    } else {
        crate::metrics::record_health_check_failure();
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Run a fund-moving pipeline on its own task.
///
/// A dropped connection drops the handler future, not the pipeline: every
/// submitted transaction still gets persisted.
async fn detached<T, F>(pipeline: F) -> ExchangeResult<T>
where
    T: Send + 'static,
    F: Future<Output = ExchangeResult<T>> + Send + 'static,
{
    tokio::spawn(pipeline)
        .await
        .map_err(|e| ExchangeError::Internal(format!("exchange pipeline aborted: {e}")))?
}

/// Fill the order and deploy both escrows
async fn submit_fill(
    State(state): State<AppState>,
    Json(request): Json<FillRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move { orchestrator.submit_fill(request).await }).await?;
    Ok(Json(outcome))
}

/// Wait for finality, then withdraw both escrows with the secret
async fn reveal_secret(
    State(state): State<AppState>,
    Json(request): Json<RevealRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move { orchestrator.reveal_secret(request).await }).await?;
    Ok(Json(outcome))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orchestrator.get_order(id).await?;
    let transactions = order.transactions(state.orchestrator.registry());
    Ok(Json(OrderResponse { order, transactions }))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.orchestrator.cancel(id, request.side).await?;
    let transactions = order.transactions(state.orchestrator.registry());
    Ok(Json(OrderResponse { order, transactions }))
}

// Request and response types

#[derive(Deserialize)]
struct CancelRequest {
    side: EscrowSide,
}

#[derive(Serialize)]
struct OrderResponse {
    #[serde(flatten)]
    order: crate::state::ExchangeOrder,
    transactions: Vec<crate::state::TransactionLink>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    status: String,
    message: String,
    error: String,
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
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}
