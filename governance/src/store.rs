//! Persistence contract
//!
//! Every mutating method is one atomic conditional update: the check and the
//! write happen under the same lock or transaction, and a failed check leaves
//! nothing behind. Domain rules live on the record types; stores only make
//! them atomic.

use crate::clock::Timestamp;
use crate::delegation::Delegation;
use crate::error::Result;
use crate::multisig::{MultisigId, MultisigProposal, MultisigSignature};
use crate::proposal::{Proposal, ProposalId, ProposalQuery};
use crate::relay::RelayRequest;
use crate::timelock::{Settlement, TimelockOperation};
use crate::types::Address;
use crate::voting::Vote;
use async_trait::async_trait;

/// In-place change to a stored proposal; an `Err` aborts the write
pub type ProposalMutation<'a> = &'a (dyn Fn(&mut Proposal) -> Result<()> + Send + Sync);

/// In-place change to a stored multisig proposal; an `Err` aborts the write
pub type MultisigMutation<'a> = &'a (dyn Fn(&mut MultisigProposal) -> Result<()> + Send + Sync);

#[async_trait]
pub trait GovernanceStore: Send + Sync {
    // proposals

    async fn next_proposal_id(&self) -> Result<ProposalId>;

    async fn insert_proposal(&self, proposal: Proposal) -> Result<()>;

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>>;

    /// Proposals matching the query's category and proposer filters, unpaged
    async fn list_proposals(&self, query: &ProposalQuery) -> Result<Vec<Proposal>>;

    async fn update_proposal(&self, id: ProposalId, mutation: ProposalMutation<'_>) -> Result<Proposal>;

    /// Cancel a proposal. A queued proposal's operation is cancelled in the
    /// same step.
    async fn cancel_proposal(
        &self,
        id: ProposalId,
        actor: &Address,
        reason: &str,
        at: Timestamp,
    ) -> Result<Proposal>;

    // votes

    /// Insert unique on (proposal, voter) and add to the tally. Fails with
    /// `AlreadyVoted` or `VotingNotActive` without touching either.
    async fn record_vote(&self, vote: Vote) -> Result<Proposal>;

    async fn get_vote(&self, proposal_id: ProposalId, voter: &Address) -> Result<Option<Vote>>;

    async fn list_votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>>;

    // delegations

    /// Revoke the delegator's active row (if any) at the new row's
    /// `effective_from` and append the new row. Returns the revoked row.
    async fn replace_delegation(&self, delegation: Delegation) -> Result<Option<Delegation>>;

    /// All rows for a delegator, oldest first
    async fn delegation_history(&self, delegator: &Address) -> Result<Vec<Delegation>>;

    /// All rows ever naming `delegatee`
    async fn delegations_to(&self, delegatee: &Address) -> Result<Vec<Delegation>>;

    // timelock

    /// Insert unique on operation hash and mark the parent proposal queued.
    /// Fails with `AlreadyQueued` if the hash exists.
    async fn queue_operation(&self, operation: TimelockOperation) -> Result<Proposal>;

    async fn get_operation(&self, hash: &str) -> Result<Option<TimelockOperation>>;

    async fn list_operations(&self) -> Result<Vec<TimelockOperation>>;

    /// Move a `Queued` operation to a terminal status and stamp the parent
    /// proposal. Only one settlement per operation can ever commit.
    async fn settle_operation(
        &self,
        hash: &str,
        settlement: Settlement,
        at: Timestamp,
    ) -> Result<TimelockOperation>;

    // multisig

    async fn next_multisig_id(&self) -> Result<MultisigId>;

    async fn insert_multisig(&self, proposal: MultisigProposal) -> Result<()>;

    async fn get_multisig(&self, id: MultisigId) -> Result<Option<MultisigProposal>>;

    async fn list_multisig(&self) -> Result<Vec<MultisigProposal>>;

    async fn update_multisig(&self, id: MultisigId, mutation: MultisigMutation<'_>) -> Result<MultisigProposal>;

    /// Record a signature and bump the count, flipping to `Approved` at the
    /// threshold. Returns the proposal and whether this call flipped it.
    async fn add_signature(
        &self,
        signature: MultisigSignature,
        at: Timestamp,
    ) -> Result<(MultisigProposal, bool)>;

    async fn revoke_signature(
        &self,
        id: MultisigId,
        signer: &Address,
        at: Timestamp,
    ) -> Result<MultisigProposal>;

    async fn list_signatures(&self, id: MultisigId) -> Result<Vec<MultisigSignature>>;

    // relay

    async fn current_nonce(&self, address: &Address) -> Result<u64>;

    /// Compare-and-increment. Fails with `InvalidNonce` if `expected` is not
    /// the current value.
    async fn consume_nonce(&self, address: &Address, expected: u64) -> Result<u64>;

    async fn insert_relay_request(&self, request: RelayRequest) -> Result<()>;

    async fn update_relay_request(&self, request: RelayRequest) -> Result<()>;

    async fn get_relay_request(&self, id: &str) -> Result<Option<RelayRequest>>;
}
