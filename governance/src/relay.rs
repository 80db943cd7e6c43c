//! Gasless relay for signed votes and delegations
//!
//! A signed payload is admitted only when its deadline has not passed, its
//! nonce is exactly the signer's next nonce and its signature verifies. Every
//! admitted request is logged as `Pending` before anything downstream runs and
//! always ends as `Submitted` or `Failed`.

use crate::clock::{Clock, Timestamp};
use crate::delegation::{Delegation, DelegationRegistry};
use crate::error::{GovernanceError, Result};
use crate::hash::FieldHasher;
use crate::proposal::ProposalId;
use crate::rate_limit::{RateLimitedAction, RateLimiter};
use crate::signature::{SignatureDomain, SignatureVerifier};
use crate::store::GovernanceStore;
use crate::types::Address;
use crate::voting::{Vote, VoteChoice, VotingEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const VOTE_TAG: &str = "CIVIC_BALLOT_V1";
const DELEGATION_TAG: &str = "CIVIC_DELEGATION_V1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVote {
    pub proposal_id: ProposalId,
    pub voter: Address,
    pub choice: VoteChoice,
    pub reason: Option<String>,
    pub nonce: u64,
    pub deadline: Timestamp,
}

impl SignedVote {
    pub fn digest(&self) -> [u8; 32] {
        let mut h = FieldHasher::new(VOTE_TAG);
        h.u64(self.proposal_id)
            .str(self.voter.as_str())
            .u64(u64::from(self.choice.as_u8()))
            .str(self.reason.as_deref().unwrap_or(""))
            .u64(self.nonce)
            .u64(self.deadline);
        h.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegator: Address,
    pub delegatee: Address,
    pub nonce: u64,
    pub deadline: Timestamp,
}

impl SignedDelegation {
    pub fn digest(&self) -> [u8; 32] {
        let mut h = FieldHasher::new(DELEGATION_TAG);
        h.str(self.delegator.as_str())
            .str(self.delegatee.as_str())
            .u64(self.nonce)
            .u64(self.deadline);
        h.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    Vote,
    Delegation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    Pending,
    Submitted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub id: String,
    pub kind: RelayKind,
    pub signer: Address,
    pub nonce: u64,
    pub payload_digest: String,
    pub received_at: Timestamp,
    pub status: RelayStatus,
    pub error: Option<String>,
    pub completed_at: Option<Timestamp>,
}

pub struct NonceRelay {
    store: Arc<dyn GovernanceStore>,
    verifier: Arc<dyn SignatureVerifier>,
    voting: Arc<VotingEngine>,
    delegations: Arc<DelegationRegistry>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    domain: SignatureDomain,
}

impl NonceRelay {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        verifier: Arc<dyn SignatureVerifier>,
        voting: Arc<VotingEngine>,
        delegations: Arc<DelegationRegistry>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        domain: SignatureDomain,
    ) -> Self {
        Self {
            store,
            verifier,
            voting,
            delegations,
            clock,
            limiter,
            domain,
        }
    }

    pub async fn nonce_of(&self, address: &Address) -> Result<u64> {
        self.store.current_nonce(address).await
    }

    pub async fn submit_signed_vote(&self, payload: SignedVote, signature: &[u8]) -> Result<(RelayRequest, Vote)> {
        self.limiter
            .check(RateLimitedAction::Vote, payload.voter.as_str())?;
        let digest = payload.digest();
        let request = self
            .admit(RelayKind::Vote, &payload.voter, payload.nonce, payload.deadline, &digest, signature)
            .await?;

        let outcome = self
            .voting
            .cast_admitted(payload.proposal_id, &payload.voter, payload.choice, payload.reason)
            .await;
        let request = self.finish(request, outcome.as_ref().err()).await?;
        outcome.map(|vote| (request, vote))
    }

    pub async fn submit_signed_delegation(
        &self,
        payload: SignedDelegation,
        signature: &[u8],
    ) -> Result<(RelayRequest, Delegation)> {
        self.limiter
            .check(RateLimitedAction::Delegate, payload.delegator.as_str())?;
        let digest = payload.digest();
        let request = self
            .admit(
                RelayKind::Delegation,
                &payload.delegator,
                payload.nonce,
                payload.deadline,
                &digest,
                signature,
            )
            .await?;

        let outcome = self
            .delegations
            .delegate_admitted(&payload.delegator, &payload.delegatee)
            .await;
        let request = self.finish(request, outcome.as_ref().err()).await?;
        outcome.map(|delegation| (request, delegation))
    }

    pub async fn get(&self, id: &str) -> Result<RelayRequest> {
        self.store
            .get_relay_request(id)
            .await?
            .ok_or_else(|| GovernanceError::RelayRequestNotFound(id.to_string()))
    }

    /// Deadline, nonce and signature checks, then log the request and burn
    /// the nonce
    async fn admit(
        &self,
        kind: RelayKind,
        signer: &Address,
        nonce: u64,
        deadline: Timestamp,
        digest: &[u8; 32],
        signature: &[u8],
    ) -> Result<RelayRequest> {
        let now = self.clock.now();
        if deadline < now {
            return Err(GovernanceError::SignatureExpired { deadline, now });
        }

        let expected = self.store.current_nonce(signer).await?;
        if nonce != expected {
            warn!(signer = %signer, expected, got = nonce, "relay_nonce_mismatch");
            return Err(GovernanceError::InvalidNonce {
                expected,
                got: nonce,
            });
        }

        if !self
            .verifier
            .verify(&self.domain, digest, signature, signer)
            .await?
        {
            warn!(signer = %signer, kind = ?kind, "relay_signature_invalid");
            return Err(GovernanceError::InvalidSignature);
        }

        let request = RelayRequest {
            id: Uuid::new_v4().to_string(),
            kind,
            signer: signer.clone(),
            nonce,
            payload_digest: hex::encode(digest),
            received_at: now,
            status: RelayStatus::Pending,
            error: None,
            completed_at: None,
        };
        self.store.insert_relay_request(request.clone()).await?;
        info!(request_id = %request.id, signer = %signer, kind = ?kind, nonce, "relay_request_accepted");

        // a concurrent request with the same nonce may have won since the read above
        if let Err(e) = self.store.consume_nonce(signer, nonce).await {
            self.finish(request, Some(&e)).await?;
            return Err(e);
        }
        Ok(request)
    }

    async fn finish(&self, mut request: RelayRequest, failure: Option<&GovernanceError>) -> Result<RelayRequest> {
        request.completed_at = Some(self.clock.now());
        match failure {
            None => {
                request.status = RelayStatus::Submitted;
                info!(request_id = %request.id, "relay_request_submitted");
            }
            Some(e) => {
                request.status = RelayStatus::Failed;
                request.error = Some(e.to_string());
                info!(request_id = %request.id, error = %e, "relay_request_failed");
            }
        }
        if let Err(e) = self.store.update_relay_request(request.clone()).await {
            error!(request_id = %request.id, error = %e, "relay_request_update_failed");
            return Err(e);
        }
        Ok(request)
    }
}
