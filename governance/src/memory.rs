//! In-memory store
//!
//! One `DashMap` per table. Cross-table updates take the owning row's
//! guard first: proposals before votes and operations, multisig proposals
//! before signatures.

use crate::clock::Timestamp;
use crate::delegation::Delegation;
use crate::error::{GovernanceError, Result};
use crate::multisig::{MultisigId, MultisigProposal, MultisigSignature};
use crate::proposal::{Proposal, ProposalId, ProposalQuery, ProposalState};
use crate::relay::RelayRequest;
use crate::store::{GovernanceStore, MultisigMutation, ProposalMutation};
use crate::timelock::{OperationStatus, Settlement, TimelockOperation};
use crate::types::{Address, HashHex};
use crate::voting::Vote;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    proposal_seq: AtomicU64,
    multisig_seq: AtomicU64,
    proposals: DashMap<ProposalId, Proposal>,
    votes: DashMap<(ProposalId, Address), Vote>,
    delegations: DashMap<Address, Vec<Delegation>>,
    operations: DashMap<HashHex, TimelockOperation>,
    multisig: DashMap<MultisigId, MultisigProposal>,
    signatures: DashMap<(MultisigId, Address), MultisigSignature>,
    nonces: DashMap<Address, u64>,
    relay_requests: DashMap<String, RelayRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn operation(&self, hash: &str) -> Result<TimelockOperation> {
        self.operations
            .get(hash)
            .map(|op| op.clone())
            .ok_or_else(|| GovernanceError::OperationNotFound(hash.to_string()))
    }
}

#[async_trait]
impl GovernanceStore for MemoryStore {
    async fn next_proposal_id(&self) -> Result<ProposalId> {
        Ok(self.proposal_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_proposal(&self, proposal: Proposal) -> Result<()> {
        match self.proposals.entry(proposal.id) {
            Entry::Occupied(_) => Err(GovernanceError::Storage(format!(
                "proposal {} already exists",
                proposal.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(proposal);
                Ok(())
            }
        }
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(&id).map(|p| p.clone()))
    }

    async fn list_proposals(&self, query: &ProposalQuery) -> Result<Vec<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| query.matches_record(p.value()))
            .map(|p| p.value().clone())
            .collect())
    }

    async fn update_proposal(&self, id: ProposalId, mutation: ProposalMutation<'_>) -> Result<Proposal> {
        let mut row = self
            .proposals
            .get_mut(&id)
            .ok_or(GovernanceError::ProposalNotFound(id))?;
        let mut updated = row.clone();
        mutation(&mut updated)?;
        *row = updated.clone();
        Ok(updated)
    }

    async fn cancel_proposal(
        &self,
        id: ProposalId,
        actor: &Address,
        reason: &str,
        at: Timestamp,
    ) -> Result<Proposal> {
        let mut row = self
            .proposals
            .get_mut(&id)
            .ok_or(GovernanceError::ProposalNotFound(id))?;
        let mut updated = row.clone();

        match updated.operation_hash.clone() {
            Some(hash) if updated.state_at(at) == ProposalState::Queued => {
                let mut op_row = self
                    .operations
                    .get_mut(&hash)
                    .ok_or_else(|| GovernanceError::OperationNotFound(hash.clone()))?;
                let mut op = op_row.clone();
                updated.cancel(actor, reason, at, Some(&mut op))?;
                *op_row = op;
            }
            _ => updated.cancel(actor, reason, at, None)?,
        }

        *row = updated.clone();
        Ok(updated)
    }

    async fn record_vote(&self, vote: Vote) -> Result<Proposal> {
        let mut row = self
            .proposals
            .get_mut(&vote.proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(vote.proposal_id))?;

        match self.votes.entry((vote.proposal_id, vote.voter.clone())) {
            Entry::Occupied(_) => Err(GovernanceError::AlreadyVoted {
                proposal_id: vote.proposal_id,
                voter: vote.voter.to_string(),
            }),
            Entry::Vacant(slot) => {
                let mut updated = row.clone();
                updated.apply_vote(&vote)?;
                slot.insert(vote);
                *row = updated.clone();
                Ok(updated)
            }
        }
    }

    async fn get_vote(&self, proposal_id: ProposalId, voter: &Address) -> Result<Option<Vote>> {
        Ok(self
            .votes
            .get(&(proposal_id, voter.clone()))
            .map(|v| v.clone()))
    }

    async fn list_votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>> {
        let mut votes: Vec<Vote> = self
            .votes
            .iter()
            .filter(|v| v.proposal_id == proposal_id)
            .map(|v| v.value().clone())
            .collect();
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then_with(|| a.voter.cmp(&b.voter)));
        Ok(votes)
    }

    async fn replace_delegation(&self, delegation: Delegation) -> Result<Option<Delegation>> {
        let mut history = self
            .delegations
            .entry(delegation.delegator.clone())
            .or_default();
        let previous = history
            .iter_mut()
            .rev()
            .find(|row| row.revoked_at.is_none())
            .map(|row| {
                row.revoked_at = Some(delegation.effective_from);
                row.clone()
            });
        history.push(delegation);
        Ok(previous)
    }

    async fn delegation_history(&self, delegator: &Address) -> Result<Vec<Delegation>> {
        Ok(self
            .delegations
            .get(delegator)
            .map(|h| h.clone())
            .unwrap_or_default())
    }

    async fn delegations_to(&self, delegatee: &Address) -> Result<Vec<Delegation>> {
        Ok(self
            .delegations
            .iter()
            .flat_map(|h| {
                h.value()
                    .iter()
                    .filter(|d| d.delegatee == *delegatee)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn queue_operation(&self, operation: TimelockOperation) -> Result<Proposal> {
        let mut row = self
            .proposals
            .get_mut(&operation.proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(operation.proposal_id))?;

        match self.operations.entry(operation.operation_hash.clone()) {
            Entry::Occupied(existing) => Err(GovernanceError::AlreadyQueued(existing.key().clone())),
            Entry::Vacant(slot) => {
                let mut updated = row.clone();
                updated.mark_queued(
                    &operation.operation_hash,
                    operation.queued_at,
                    operation.eta,
                    operation.expires_at(),
                )?;
                slot.insert(operation);
                *row = updated.clone();
                Ok(updated)
            }
        }
    }

    async fn get_operation(&self, hash: &str) -> Result<Option<TimelockOperation>> {
        Ok(self.operations.get(hash).map(|op| op.clone()))
    }

    async fn list_operations(&self) -> Result<Vec<TimelockOperation>> {
        Ok(self.operations.iter().map(|op| op.value().clone()).collect())
    }

    async fn settle_operation(
        &self,
        hash: &str,
        settlement: Settlement,
        at: Timestamp,
    ) -> Result<TimelockOperation> {
        let snapshot = self.operation(hash)?;
        // executed is terminal, so reading it outside the guards is stable
        let predecessor_executed = match &snapshot.predecessor {
            Some(pred) => self
                .operations
                .get(pred)
                .is_some_and(|p| p.status == OperationStatus::Executed),
            None => true,
        };

        let mut proposal_row = self
            .proposals
            .get_mut(&snapshot.proposal_id)
            .ok_or(GovernanceError::ProposalNotFound(snapshot.proposal_id))?;
        let mut op_row = self
            .operations
            .get_mut(hash)
            .ok_or_else(|| GovernanceError::OperationNotFound(hash.to_string()))?;

        let mut op = op_row.clone();
        op.settle(&settlement, at, predecessor_executed)?;
        let mut proposal = proposal_row.clone();
        proposal.apply_settlement(&op);

        *op_row = op.clone();
        *proposal_row = proposal;
        Ok(op)
    }

    async fn next_multisig_id(&self) -> Result<MultisigId> {
        Ok(self.multisig_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert_multisig(&self, proposal: MultisigProposal) -> Result<()> {
        match self.multisig.entry(proposal.id) {
            Entry::Occupied(_) => Err(GovernanceError::Storage(format!(
                "multisig proposal {} already exists",
                proposal.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(proposal);
                Ok(())
            }
        }
    }

    async fn get_multisig(&self, id: MultisigId) -> Result<Option<MultisigProposal>> {
        Ok(self.multisig.get(&id).map(|p| p.clone()))
    }

    async fn list_multisig(&self) -> Result<Vec<MultisigProposal>> {
        Ok(self.multisig.iter().map(|p| p.value().clone()).collect())
    }

    async fn update_multisig(&self, id: MultisigId, mutation: MultisigMutation<'_>) -> Result<MultisigProposal> {
        let mut row = self
            .multisig
            .get_mut(&id)
            .ok_or(GovernanceError::MultisigNotFound(id))?;
        let mut updated = row.clone();
        mutation(&mut updated)?;
        *row = updated.clone();
        Ok(updated)
    }

    async fn add_signature(
        &self,
        signature: MultisigSignature,
        at: Timestamp,
    ) -> Result<(MultisigProposal, bool)> {
        let id = signature.proposal_id;
        let mut row = self
            .multisig
            .get_mut(&id)
            .ok_or(GovernanceError::MultisigNotFound(id))?;

        let key = (id, signature.signer.clone());
        let existing = self.signatures.get(&key).map(|s| s.clone());
        let mut updated = row.clone();
        let flipped = updated.apply_signature(existing.as_ref(), &signature.signer, at)?;

        self.signatures.insert(key, signature);
        *row = updated.clone();
        Ok((updated, flipped))
    }

    async fn revoke_signature(
        &self,
        id: MultisigId,
        signer: &Address,
        at: Timestamp,
    ) -> Result<MultisigProposal> {
        let mut row = self
            .multisig
            .get_mut(&id)
            .ok_or(GovernanceError::MultisigNotFound(id))?;

        let key = (id, signer.clone());
        let existing = self.signatures.get(&key).map(|s| s.clone());
        let mut updated = row.clone();
        updated.apply_revocation(existing.as_ref(), signer, at)?;

        if let Some(mut sig) = self.signatures.get_mut(&key) {
            sig.revoked = true;
            sig.revoked_at = Some(at);
        }
        *row = updated.clone();
        Ok(updated)
    }

    async fn list_signatures(&self, id: MultisigId) -> Result<Vec<MultisigSignature>> {
        let mut sigs: Vec<MultisigSignature> = self
            .signatures
            .iter()
            .filter(|s| s.proposal_id == id)
            .map(|s| s.value().clone())
            .collect();
        sigs.sort_by(|a, b| a.signed_at.cmp(&b.signed_at).then_with(|| a.signer.cmp(&b.signer)));
        Ok(sigs)
    }

    async fn current_nonce(&self, address: &Address) -> Result<u64> {
        Ok(self.nonces.get(address).map(|n| *n).unwrap_or(0))
    }

    async fn consume_nonce(&self, address: &Address, expected: u64) -> Result<u64> {
        let mut current = self.nonces.entry(address.clone()).or_insert(0);
        if *current != expected {
            return Err(GovernanceError::InvalidNonce {
                expected: *current,
                got: expected,
            });
        }
        *current += 1;
        Ok(*current)
    }

    async fn insert_relay_request(&self, request: RelayRequest) -> Result<()> {
        self.relay_requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn update_relay_request(&self, request: RelayRequest) -> Result<()> {
        let mut row = self
            .relay_requests
            .get_mut(&request.id)
            .ok_or_else(|| GovernanceError::RelayRequestNotFound(request.id.clone()))?;
        *row = request;
        Ok(())
    }

    async fn get_relay_request(&self, id: &str) -> Result<Option<RelayRequest>> {
        Ok(self.relay_requests.get(id).map(|r| r.clone()))
    }
}
