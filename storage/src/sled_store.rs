//! Sled-backed governance store
//!
//! One tree per table, values encoded with bincode. Conditional updates run
//! inside sled transactions; when a rule spans two tables both trees join
//! the same transaction, so a failed check aborts every write.

use crate::error::StorageError;
use async_trait::async_trait;
use governance::store::{GovernanceStore, MultisigMutation, ProposalMutation};
use governance::{
    Address, Delegation, GovernanceError, MultisigId, MultisigProposal, MultisigSignature,
    OperationStatus, Proposal, ProposalId, ProposalQuery, ProposalState, RelayRequest, Settlement,
    TimelockOperation, Timestamp, Vote,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};
use sled::{Transactional, Tree};
use std::path::Path;
use tracing::info;

type TxResult<T> = ConflictableTransactionResult<T, GovernanceError>;

const SEQ_PROPOSAL: &[u8] = b"seq:proposal";
const SEQ_MULTISIG: &[u8] = b"seq:multisig";

#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    meta: Tree,
    proposals: Tree,
    votes: Tree,
    delegations: Tree,
    operations: Tree,
    multisig: Tree,
    signatures: Tree,
    nonces: Tree,
    relay: Tree,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "sled_store_opened");
        Self::from_db(db)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            meta: db.open_tree("meta")?,
            proposals: db.open_tree("proposals")?,
            votes: db.open_tree("votes")?,
            delegations: db.open_tree("delegations")?,
            operations: db.open_tree("operations")?,
            multisig: db.open_tree("multisig")?,
            signatures: db.open_tree("multisig_signatures")?,
            nonces: db.open_tree("nonces")?,
            relay: db.open_tree("relay_requests")?,
            db,
        })
    }

    /// Flush dirty pages to disk
    pub fn flush(&self) -> Result<usize, StorageError> {
        Ok(self.db.flush()?)
    }

    fn next_id(&self, key: &[u8]) -> Result<u64, StorageError> {
        let bumped = self.meta.update_and_fetch(key, |old| {
            let current = old.and_then(read_u64).unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;
        bumped
            .as_deref()
            .and_then(read_u64)
            .ok_or_else(|| StorageError::Corrupt {
                tree: "meta",
                detail: String::from_utf8_lossy(key).into_owned(),
            })
    }
}

// keys

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(id: u64, address: &Address) -> Vec<u8> {
    let mut key = id.to_be_bytes().to_vec();
    key.extend_from_slice(address.as_str().as_bytes());
    key
}

fn read_u64(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

// codec

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

fn read<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, StorageError> {
    tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

fn scan<T: DeserializeOwned>(iter: sled::Iter) -> Result<Vec<T>, StorageError> {
    iter.values().map(|bytes| decode(&bytes?)).collect()
}

// transaction helpers

fn abort<T>(e: impl Into<GovernanceError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e.into()))
}

fn check<T>(result: governance::Result<T>) -> TxResult<T> {
    result.map_err(ConflictableTransactionError::Abort)
}

fn required<T>(value: Option<T>, missing: impl FnOnce() -> GovernanceError) -> TxResult<T> {
    match value {
        Some(v) => Ok(v),
        None => abort(missing()),
    }
}

fn tx_get<T: DeserializeOwned>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).or_else(|e| abort(e)),
        None => Ok(None),
    }
}

fn tx_put<T: Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes = match encode(value) {
        Ok(bytes) => bytes,
        Err(e) => return abort(e),
    };
    tree.insert(key, bytes)?;
    Ok(())
}

fn finish<T>(result: TransactionResult<T, GovernanceError>) -> governance::Result<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::from(e).into(),
    })
}

#[async_trait]
impl GovernanceStore for SledStore {
    async fn next_proposal_id(&self) -> governance::Result<ProposalId> {
        Ok(self.next_id(SEQ_PROPOSAL)?)
    }

    async fn insert_proposal(&self, proposal: Proposal) -> governance::Result<()> {
        let bytes = encode(&proposal)?;
        self.proposals
            .compare_and_swap(id_key(proposal.id), None::<&[u8]>, Some(bytes))
            .map_err(StorageError::from)?
            .map_err(|_| {
                GovernanceError::Storage(format!("proposal {} already exists", proposal.id))
            })
    }

    async fn get_proposal(&self, id: ProposalId) -> governance::Result<Option<Proposal>> {
        Ok(read(&self.proposals, &id_key(id))?)
    }

    async fn list_proposals(&self, query: &ProposalQuery) -> governance::Result<Vec<Proposal>> {
        let all: Vec<Proposal> = scan(self.proposals.iter())?;
        Ok(all.into_iter().filter(|p| query.matches_record(p)).collect())
    }

    async fn update_proposal(
        &self,
        id: ProposalId,
        mutation: ProposalMutation<'_>,
    ) -> governance::Result<Proposal> {
        let key = id_key(id);
        finish(self.proposals.transaction(|tx| {
            let mut proposal: Proposal =
                required(tx_get(tx, &key)?, || GovernanceError::ProposalNotFound(id))?;
            check(mutation(&mut proposal))?;
            tx_put(tx, &key, &proposal)?;
            Ok(proposal)
        }))
    }

    async fn cancel_proposal(
        &self,
        id: ProposalId,
        actor: &Address,
        reason: &str,
        at: Timestamp,
    ) -> governance::Result<Proposal> {
        let key = id_key(id);
        finish(
            (&self.proposals, &self.operations).transaction(|(proposals, operations)| {
                let mut proposal: Proposal =
                    required(tx_get(proposals, &key)?, || GovernanceError::ProposalNotFound(id))?;

                let queued = proposal
                    .operation_hash
                    .clone()
                    .filter(|_| proposal.state_at(at) == ProposalState::Queued);
                match queued {
                    Some(hash) => {
                        let mut op: TimelockOperation =
                            required(tx_get(operations, hash.as_bytes())?, || {
                                GovernanceError::OperationNotFound(hash.clone())
                            })?;
                        check(proposal.cancel(actor, reason, at, Some(&mut op)))?;
                        tx_put(operations, hash.as_bytes(), &op)?;
                    }
                    None => check(proposal.cancel(actor, reason, at, None))?,
                }

                tx_put(proposals, &key, &proposal)?;
                Ok(proposal)
            }),
        )
    }

    async fn record_vote(&self, vote: Vote) -> governance::Result<Proposal> {
        let pkey = id_key(vote.proposal_id);
        let vkey = pair_key(vote.proposal_id, &vote.voter);
        finish((&self.proposals, &self.votes).transaction(|(proposals, votes)| {
            let mut proposal: Proposal = required(tx_get(proposals, &pkey)?, || {
                GovernanceError::ProposalNotFound(vote.proposal_id)
            })?;
            if votes.get(&vkey)?.is_some() {
                return abort(GovernanceError::AlreadyVoted {
                    proposal_id: vote.proposal_id,
                    voter: vote.voter.to_string(),
                });
            }
            check(proposal.apply_vote(&vote))?;
            tx_put(votes, &vkey, &vote)?;
            tx_put(proposals, &pkey, &proposal)?;
            Ok(proposal)
        }))
    }

    async fn get_vote(
        &self,
        proposal_id: ProposalId,
        voter: &Address,
    ) -> governance::Result<Option<Vote>> {
        Ok(read(&self.votes, &pair_key(proposal_id, voter))?)
    }

    async fn list_votes(&self, proposal_id: ProposalId) -> governance::Result<Vec<Vote>> {
        let mut votes: Vec<Vote> = scan(self.votes.scan_prefix(id_key(proposal_id)))?;
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then_with(|| a.voter.cmp(&b.voter)));
        Ok(votes)
    }

    async fn replace_delegation(
        &self,
        delegation: Delegation,
    ) -> governance::Result<Option<Delegation>> {
        let key = delegation.delegator.as_str().as_bytes().to_vec();
        finish(self.delegations.transaction(|tx| {
            let mut history: Vec<Delegation> = tx_get(tx, &key)?.unwrap_or_default();
            let previous = history
                .iter_mut()
                .rev()
                .find(|row| row.revoked_at.is_none())
                .map(|row| {
                    row.revoked_at = Some(delegation.effective_from);
                    row.clone()
                });
            history.push(delegation.clone());
            tx_put(tx, &key, &history)?;
            Ok(previous)
        }))
    }

    async fn delegation_history(&self, delegator: &Address) -> governance::Result<Vec<Delegation>> {
        Ok(read(&self.delegations, delegator.as_str().as_bytes())?.unwrap_or_default())
    }

    async fn delegations_to(&self, delegatee: &Address) -> governance::Result<Vec<Delegation>> {
        let histories: Vec<Vec<Delegation>> = scan(self.delegations.iter())?;
        Ok(histories
            .into_iter()
            .flatten()
            .filter(|d| d.delegatee == *delegatee)
            .collect())
    }

    async fn queue_operation(&self, operation: TimelockOperation) -> governance::Result<Proposal> {
        let pkey = id_key(operation.proposal_id);
        let okey = operation.operation_hash.as_bytes();
        finish(
            (&self.proposals, &self.operations).transaction(|(proposals, operations)| {
                let mut proposal: Proposal = required(tx_get(proposals, &pkey)?, || {
                    GovernanceError::ProposalNotFound(operation.proposal_id)
                })?;
                if operations.get(okey)?.is_some() {
                    return abort(GovernanceError::AlreadyQueued(
                        operation.operation_hash.clone(),
                    ));
                }
                check(proposal.mark_queued(
                    &operation.operation_hash,
                    operation.queued_at,
                    operation.eta,
                    operation.expires_at(),
                ))?;
                tx_put(operations, okey, &operation)?;
                tx_put(proposals, &pkey, &proposal)?;
                Ok(proposal)
            }),
        )
    }

    async fn get_operation(&self, hash: &str) -> governance::Result<Option<TimelockOperation>> {
        Ok(read(&self.operations, hash.as_bytes())?)
    }

    async fn list_operations(&self) -> governance::Result<Vec<TimelockOperation>> {
        Ok(scan(self.operations.iter())?)
    }

    async fn settle_operation(
        &self,
        hash: &str,
        settlement: Settlement,
        at: Timestamp,
    ) -> governance::Result<TimelockOperation> {
        let snapshot: TimelockOperation = read(&self.operations, hash.as_bytes())?
            .ok_or_else(|| GovernanceError::OperationNotFound(hash.to_string()))?;
        // executed is terminal, so reading it outside the transaction is stable
        let predecessor_executed = match &snapshot.predecessor {
            Some(pred) => read::<TimelockOperation>(&self.operations, pred.as_bytes())?
                .is_some_and(|p| p.status == OperationStatus::Executed),
            None => true,
        };

        let pkey = id_key(snapshot.proposal_id);
        finish(
            (&self.proposals, &self.operations).transaction(|(proposals, operations)| {
                let mut op: TimelockOperation = required(tx_get(operations, hash.as_bytes())?, || {
                    GovernanceError::OperationNotFound(hash.to_string())
                })?;
                check(op.settle(&settlement, at, predecessor_executed))?;

                let mut proposal: Proposal = required(tx_get(proposals, &pkey)?, || {
                    GovernanceError::ProposalNotFound(snapshot.proposal_id)
                })?;
                proposal.apply_settlement(&op);

                tx_put(operations, hash.as_bytes(), &op)?;
                tx_put(proposals, &pkey, &proposal)?;
                Ok(op)
            }),
        )
    }

    async fn next_multisig_id(&self) -> governance::Result<MultisigId> {
        Ok(self.next_id(SEQ_MULTISIG)?)
    }

    async fn insert_multisig(&self, proposal: MultisigProposal) -> governance::Result<()> {
        let bytes = encode(&proposal)?;
        self.multisig
            .compare_and_swap(id_key(proposal.id), None::<&[u8]>, Some(bytes))
            .map_err(StorageError::from)?
            .map_err(|_| {
                GovernanceError::Storage(format!(
                    "multisig proposal {} already exists",
                    proposal.id
                ))
            })
    }

    async fn get_multisig(&self, id: MultisigId) -> governance::Result<Option<MultisigProposal>> {
        Ok(read(&self.multisig, &id_key(id))?)
    }

    async fn list_multisig(&self) -> governance::Result<Vec<MultisigProposal>> {
        Ok(scan(self.multisig.iter())?)
    }

    async fn update_multisig(
        &self,
        id: MultisigId,
        mutation: MultisigMutation<'_>,
    ) -> governance::Result<MultisigProposal> {
        let key = id_key(id);
        finish(self.multisig.transaction(|tx| {
            let mut proposal: MultisigProposal =
                required(tx_get(tx, &key)?, || GovernanceError::MultisigNotFound(id))?;
            check(mutation(&mut proposal))?;
            tx_put(tx, &key, &proposal)?;
            Ok(proposal)
        }))
    }

    async fn add_signature(
        &self,
        signature: MultisigSignature,
        at: Timestamp,
    ) -> governance::Result<(MultisigProposal, bool)> {
        let id = signature.proposal_id;
        let mkey = id_key(id);
        let skey = pair_key(id, &signature.signer);
        finish(
            (&self.multisig, &self.signatures).transaction(|(multisig, signatures)| {
                let mut proposal: MultisigProposal =
                    required(tx_get(multisig, &mkey)?, || GovernanceError::MultisigNotFound(id))?;
                let existing: Option<MultisigSignature> = tx_get(signatures, &skey)?;
                let flipped =
                    check(proposal.apply_signature(existing.as_ref(), &signature.signer, at))?;
                tx_put(signatures, &skey, &signature)?;
                tx_put(multisig, &mkey, &proposal)?;
                Ok((proposal, flipped))
            }),
        )
    }

    async fn revoke_signature(
        &self,
        id: MultisigId,
        signer: &Address,
        at: Timestamp,
    ) -> governance::Result<MultisigProposal> {
        let mkey = id_key(id);
        let skey = pair_key(id, signer);
        finish(
            (&self.multisig, &self.signatures).transaction(|(multisig, signatures)| {
                let mut proposal: MultisigProposal =
                    required(tx_get(multisig, &mkey)?, || GovernanceError::MultisigNotFound(id))?;
                let existing: Option<MultisigSignature> = tx_get(signatures, &skey)?;
                check(proposal.apply_revocation(existing.as_ref(), signer, at))?;

                if let Some(mut sig) = existing {
                    sig.revoked = true;
                    sig.revoked_at = Some(at);
                    tx_put(signatures, &skey, &sig)?;
                }
                tx_put(multisig, &mkey, &proposal)?;
                Ok(proposal)
            }),
        )
    }

    async fn list_signatures(&self, id: MultisigId) -> governance::Result<Vec<MultisigSignature>> {
        let mut sigs: Vec<MultisigSignature> = scan(self.signatures.scan_prefix(id_key(id)))?;
        sigs.sort_by(|a, b| a.signed_at.cmp(&b.signed_at).then_with(|| a.signer.cmp(&b.signer)));
        Ok(sigs)
    }

    async fn current_nonce(&self, address: &Address) -> governance::Result<u64> {
        let stored = self
            .nonces
            .get(address.as_str().as_bytes())
            .map_err(StorageError::from)?;
        Ok(stored.as_deref().and_then(read_u64).unwrap_or(0))
    }

    async fn consume_nonce(&self, address: &Address, expected: u64) -> governance::Result<u64> {
        let key = address.as_str().as_bytes();
        finish(self.nonces.transaction(|tx| {
            let current = tx.get(key)?.as_deref().and_then(read_u64).unwrap_or(0);
            if current != expected {
                return abort(GovernanceError::InvalidNonce {
                    expected: current,
                    got: expected,
                });
            }
            let next = current + 1;
            tx.insert(key, &next.to_be_bytes()[..])?;
            Ok(next)
        }))
    }

    async fn insert_relay_request(&self, request: RelayRequest) -> governance::Result<()> {
        self.relay
            .insert(request.id.as_bytes(), encode(&request)?)
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn update_relay_request(&self, request: RelayRequest) -> governance::Result<()> {
        let key = request.id.as_bytes();
        if !self.relay.contains_key(key).map_err(StorageError::from)? {
            return Err(GovernanceError::RelayRequestNotFound(request.id.clone()));
        }
        self.relay
            .insert(key, encode(&request)?)
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_relay_request(&self, id: &str) -> governance::Result<Option<RelayRequest>> {
        Ok(read(&self.relay, id.as_bytes())?)
    }
}
