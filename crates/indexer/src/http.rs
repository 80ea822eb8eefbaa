//! HTTP query API

use alloy_primitives::B256;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use predmarket_merkle::{parse_market_address, parse_market_id};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    controller::IndexStatus,
    query::{MarketProof, ProofService, QueryError},
};

/// Build the query router
pub fn router(service: ProofService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/root", get(root))
        .route("/proof/:market_id", get(proof))
        .route("/verify", post(verify))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(service)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct RootResponse {
    root: B256,
}

#[derive(Deserialize)]
struct ProofParams {
    address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    market_id: String,
    market_address: String,
    path: Vec<B256>,
    root: B256,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(QueryError);

impl<E: Into<QueryError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn root(State(service): State<ProofService>) -> Result<Json<RootResponse>, ApiError> {
    Ok(Json(RootResponse { root: service.get_root().await? }))
}

async fn proof(
    State(service): State<ProofService>,
    Path(market_id): Path<String>,
    Query(params): Query<ProofParams>,
) -> Result<Json<MarketProof>, ApiError> {
    let market_id = parse_market_id(&market_id)?;
    let proof = match params.address {
        Some(address) => service.get_proof(market_id, parse_market_address(&address)?).await?,
        None => service.get_proof_by_id(market_id).await?,
    };
    Ok(Json(proof))
}

async fn verify(Json(request): Json<VerifyRequest>) -> Result<Json<VerifyResponse>, ApiError> {
    let market_id = parse_market_id(&request.market_id)?;
    let market_address = parse_market_address(&request.market_address)?;
    let valid = ProofService::verify(market_id, market_address, &request.path, &request.root);
    Ok(Json(VerifyResponse { valid }))
}

async fn status(State(service): State<ProofService>) -> Json<IndexStatus> {
    Json(service.status().await)
}
