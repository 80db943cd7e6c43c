//! API routes organization
//!
//! - `proposals` - proposal lifecycle, votes, queueing and cancellation
//! - `accounts` - delegation, voting power and the signed-request relay
//! - `timelock` - queued operations
//! - `multisig` - N-of-M signer approvals
//!
//! Each submodule exports a router function with full paths; they are merged
//! here.

mod accounts;
mod multisig;
mod proposals;
mod timelock;

use crate::{ApiResult, ApiState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use governance::{GovernanceStats, SweepReport};
use serde::Serialize;

pub fn create_routes() -> Router<ApiState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/stats", get(statistics))
        .route("/maintenance/sweep", post(sweep))
        .merge(proposals::proposal_routes())
        .merge(accounts::account_routes())
        .merge(timelock::timelock_routes())
        .merge(multisig::multisig_routes())
}

async fn root() -> &'static str {
    "Civic Governance API"
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    node: String,
    uptime_secs: u64,
    now: u64,
}

async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node: state.node_name.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        now: state.engine.now(),
    })
}

async fn statistics(State(state): State<ApiState>) -> ApiResult<Json<GovernanceStats>> {
    crate::ok_json!(state.engine.statistics().await?)
}

async fn sweep(State(state): State<ApiState>) -> ApiResult<Json<SweepReport>> {
    crate::ok_json!(state.engine.sweep_expired().await?)
}
