//! Delegation, voting power and relayed signatures

use crate::identity::Caller;
use crate::response::decode_hex;
use crate::{ApiResult, ApiState};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use governance::{
    Address, Delegation, RelayRequest, SignedDelegation, SignedVote, Vote, VotingPowerSnapshot,
};
use serde::{Deserialize, Serialize};

pub fn account_routes() -> Router<ApiState> {
    Router::new()
        .route("/delegations", post(delegate))
        .route("/delegations/signed", post(submit_signed_delegation))
        .route("/votes/signed", post(submit_signed_vote))
        .route("/accounts/{address}/power", get(voting_power))
        .route("/relay/{id}", get(relay_request))
}

#[derive(Debug, Deserialize)]
pub struct DelegateRequest {
    pub delegator: Address,
    pub delegatee: Address,
}

#[derive(Debug, Deserialize)]
pub struct SignedRequest<T> {
    pub payload: T,
    /// Hex Ed25519 signature over the domain-separated payload digest
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct RelayedVote {
    pub request: RelayRequest,
    pub vote: Vote,
}

#[derive(Debug, Serialize)]
pub struct RelayedDelegation {
    pub request: RelayRequest,
    pub delegation: Delegation,
}

async fn delegate(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(request): Json<DelegateRequest>,
) -> ApiResult<Json<Delegation>> {
    crate::ok_json!(
        state
            .engine
            .delegate(&ctx, &request.delegator, &request.delegatee)
            .await?
    )
}

async fn submit_signed_vote(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(request): Json<SignedRequest<SignedVote>>,
) -> ApiResult<Json<RelayedVote>> {
    let signature = decode_hex("signature", &request.signature)?;
    let (request, vote) = state
        .engine
        .submit_signed_vote(&ctx, request.payload, &signature)
        .await?;
    crate::ok_json!(RelayedVote { request, vote })
}

async fn submit_signed_delegation(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(request): Json<SignedRequest<SignedDelegation>>,
) -> ApiResult<Json<RelayedDelegation>> {
    let signature = decode_hex("signature", &request.signature)?;
    let (request, delegation) = state
        .engine
        .submit_signed_delegation(&ctx, request.payload, &signature)
        .await?;
    crate::ok_json!(RelayedDelegation {
        request,
        delegation
    })
}

async fn voting_power(
    State(state): State<ApiState>,
    Path(address): Path<Address>,
) -> ApiResult<Json<VotingPowerSnapshot>> {
    crate::ok_json!(state.engine.voting_power(&address).await?)
}

async fn relay_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RelayRequest>> {
    crate::ok_json!(state.engine.relay_request(&id).await?)
}
