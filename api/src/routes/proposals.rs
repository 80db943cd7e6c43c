//! Proposal lifecycle endpoints

use crate::identity::Caller;
use crate::{ApiError, ApiResult, ApiState};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use governance::proposal::actions_from_parts;
use governance::types::HashHex;
use governance::{
    Address, NewProposal, Proposal, ProposalCategory, ProposalId, ProposalPage,
    ProposalQuery, ProposalView, TimelockOperation, Vote, VoteChoice,
};
use serde::Deserialize;

pub fn proposal_routes() -> Router<ApiState> {
    Router::new()
        .route("/proposals", get(list_proposals).post(create_proposal))
        .route("/proposals/{id}", get(get_proposal))
        .route("/proposals/{id}/votes", get(list_votes).post(cast_vote))
        .route("/proposals/{id}/votes/{voter}", get(get_vote))
        .route("/proposals/{id}/queue", post(queue_proposal))
        .route("/proposals/{id}/cancel", post(cancel_proposal))
}

#[derive(Debug, Deserialize)]
pub struct CreateProposalRequest {
    pub proposer: Address,
    pub title: String,
    pub description: String,
    pub category: ProposalCategory,
    pub targets: Vec<String>,
    pub values: Vec<String>,
    pub calldatas: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub voter: Address,
    /// `for`, `against`, `abstain` or 1, 0, 2
    pub choice: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueRequest {
    pub delay_secs: Option<u64>,
    pub predecessor: Option<HashHex>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor: Address,
    #[serde(default)]
    pub reason: String,
}

async fn create_proposal(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(request): Json<CreateProposalRequest>,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    let actions = actions_from_parts(&request.targets, &request.values, &request.calldatas)?;
    let proposal = state
        .engine
        .create_proposal(
            &ctx,
            &request.proposer,
            NewProposal {
                title: request.title,
                description: request.description,
                category: request.category,
                actions,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

async fn list_proposals(
    State(state): State<ApiState>,
    Query(query): Query<ProposalQuery>,
) -> ApiResult<Json<ProposalPage>> {
    crate::ok_json!(state.engine.list_proposals(&query).await?)
}

async fn get_proposal(
    State(state): State<ApiState>,
    Path(id): Path<ProposalId>,
) -> ApiResult<Json<ProposalView>> {
    crate::ok_json!(state.engine.proposal(id).await?)
}

async fn cast_vote(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<ProposalId>,
    Json(request): Json<CastVoteRequest>,
) -> ApiResult<Json<Vote>> {
    let choice: VoteChoice = request.choice.parse()?;
    crate::ok_json!(
        state
            .engine
            .cast_vote(&ctx, id, &request.voter, choice, request.reason)
            .await?
    )
}

async fn list_votes(
    State(state): State<ApiState>,
    Path(id): Path<ProposalId>,
) -> ApiResult<Json<Vec<Vote>>> {
    crate::ok_json!(state.engine.votes(id).await?)
}

async fn get_vote(
    State(state): State<ApiState>,
    Path((id, voter)): Path<(ProposalId, Address)>,
) -> ApiResult<Json<Option<Vote>>> {
    crate::ok_json!(state.engine.vote_of(id, &voter).await?)
}

async fn queue_proposal(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<ProposalId>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TimelockOperation>)> {
    // the body is optional: an empty POST queues with the minimum delay
    let request: QueueRequest = if body.is_empty() {
        QueueRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid queue request: {}", e)))?
    };
    let operation = state
        .engine
        .queue(&ctx, id, request.delay_secs, request.predecessor)
        .await?;
    Ok((StatusCode::CREATED, Json(operation)))
}

async fn cancel_proposal(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<ProposalId>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<Proposal>> {
    crate::ok_json!(
        state
            .engine
            .cancel_proposal(&ctx, id, &request.actor, &request.reason)
            .await?
    )
}
