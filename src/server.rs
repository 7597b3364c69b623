//! HTTP route layer in front of the aggregator.

use crate::aggregator::IpReputationAggregator;
use crate::providers::IpReputation;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
}

/// Body of `GET /api/v1/ip/{ip}`.
#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub ip: String,
    /// `null` when no provider had data.
    pub reputation: Option<IpReputation>,
}

/// Build the router.
pub fn build_router(aggregator: Arc<IpReputationAggregator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/ip/{ip}", get(ip_reputation))
        .with_state(aggregator)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(
    addr: SocketAddr,
    aggregator: Arc<IpReputationAggregator>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening");
    axum::serve(listener, build_router(aggregator)).await?;
    Ok(())
}

/// `GET /healthz`
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /api/v1/ip/{ip}`: reputation is `null` rather than an error status
/// when nothing is known.
async fn ip_reputation(
    State(aggregator): State<Arc<IpReputationAggregator>>,
    Path(ip): Path<String>,
) -> Json<LookupResponse> {
    let reputation = aggregator.check_ip(&ip).await;
    Json(LookupResponse { ip, reputation })
}
