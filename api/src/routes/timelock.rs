//! Timelock queue endpoints

use crate::identity::Caller;
use crate::response::StatusFilter;
use crate::{ApiResult, ApiState};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use governance::{Address, OperationStatus, OperationView, TimelockOperation};
use serde::Deserialize;

pub fn timelock_routes() -> Router<ApiState> {
    Router::new()
        .route("/timelock", get(list_operations))
        .route("/timelock/{hash}", get(get_operation))
        .route("/timelock/{hash}/execute", post(execute_operation))
        .route("/timelock/{hash}/cancel", post(cancel_operation))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub executor: Address,
}

#[derive(Debug, Deserialize)]
pub struct CancelOperationRequest {
    pub canceller: Address,
    #[serde(default)]
    pub reason: String,
}

async fn list_operations(
    State(state): State<ApiState>,
    Query(filter): Query<StatusFilter<OperationStatus>>,
) -> ApiResult<Json<Vec<OperationView>>> {
    crate::ok_json!(state.engine.timelock_queue(filter.status).await?)
}

async fn get_operation(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<OperationView>> {
    crate::ok_json!(state.engine.timelock_status(&hash).await?)
}

async fn execute_operation(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(hash): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<TimelockOperation>> {
    crate::ok_json!(state.engine.execute(&ctx, &hash, &request.executor).await?)
}

async fn cancel_operation(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(hash): Path<String>,
    Json(request): Json<CancelOperationRequest>,
) -> ApiResult<Json<TimelockOperation>> {
    crate::ok_json!(
        state
            .engine
            .cancel_timelock(&ctx, &hash, &request.canceller, &request.reason)
            .await?
    )
}
