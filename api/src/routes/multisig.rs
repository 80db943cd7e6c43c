//! Multisig approval endpoints

use crate::identity::Caller;
use crate::response::{decode_hex, StatusFilter};
use crate::{ApiResult, ApiState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use governance::{
    Address, MultisigId, MultisigProposal, MultisigStatus, MultisigView, NewMultisigProposal,
};
use serde::Deserialize;

pub fn multisig_routes() -> Router<ApiState> {
    Router::new()
        .route("/multisig", get(list_multisig).post(create_multisig))
        .route("/multisig/{id}", get(get_multisig))
        .route("/multisig/{id}/signatures", post(sign_multisig))
        .route("/multisig/{id}/signatures/{signer}", delete(revoke_signature))
        .route("/multisig/{id}/execute", post(execute_multisig))
        .route("/multisig/{id}/cancel", post(cancel_multisig))
}

#[derive(Debug, Deserialize)]
pub struct CreateMultisigRequest {
    pub proposer: Address,
    #[serde(flatten)]
    pub proposal: NewMultisigProposal,
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub signer: Address,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: Address,
}

async fn create_multisig(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(request): Json<CreateMultisigRequest>,
) -> ApiResult<(StatusCode, Json<MultisigProposal>)> {
    let proposal = state
        .engine
        .create_multisig_proposal(&ctx, &request.proposer, request.proposal)
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

async fn list_multisig(
    State(state): State<ApiState>,
    Query(filter): Query<StatusFilter<MultisigStatus>>,
) -> ApiResult<Json<Vec<MultisigProposal>>> {
    crate::ok_json!(state.engine.list_multisig_proposals(filter.status).await?)
}

async fn get_multisig(
    State(state): State<ApiState>,
    Path(id): Path<MultisigId>,
) -> ApiResult<Json<MultisigView>> {
    crate::ok_json!(state.engine.multisig_proposal(id).await?)
}

async fn sign_multisig(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<MultisigId>,
    Json(request): Json<SignRequest>,
) -> ApiResult<Json<MultisigProposal>> {
    let signature = decode_hex("signature", &request.signature)?;
    crate::ok_json!(
        state
            .engine
            .sign_multisig_proposal(&ctx, id, &request.signer, signature)
            .await?
    )
}

async fn revoke_signature(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path((id, signer)): Path<(MultisigId, Address)>,
) -> ApiResult<Json<MultisigProposal>> {
    crate::ok_json!(
        state
            .engine
            .revoke_multisig_signature(&ctx, id, &signer)
            .await?
    )
}

async fn execute_multisig(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<MultisigId>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<MultisigProposal>> {
    crate::ok_json!(
        state
            .engine
            .execute_multisig_proposal(&ctx, id, &request.actor)
            .await?
    )
}

async fn cancel_multisig(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<MultisigId>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<MultisigProposal>> {
    crate::ok_json!(
        state
            .engine
            .cancel_multisig_proposal(&ctx, id, &request.actor)
            .await?
    )
}
