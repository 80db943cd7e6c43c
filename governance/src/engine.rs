//! Engine facade
//!
//! Wires the components to one store, clock and config, and gives every
//! inbound verb a traced, identity-checked entry point.

use crate::clock::{Clock, Timestamp};
use crate::config::GovernanceConfig;
use crate::context::RequestContext;
use crate::delegation::{Delegation, DelegationRegistry, DelegationSnapshot};
use crate::error::{ErrorKind, Result};
use crate::multisig::{
    MultisigApprovalEngine, MultisigId, MultisigProposal, MultisigStatus, MultisigView,
    NewMultisigProposal,
};
use crate::oracle::{bounded, VotingPowerOracle};
use crate::proposal::{
    NewProposal, Proposal, ProposalId, ProposalManager, ProposalPage, ProposalQuery,
    ProposalState, ProposalView,
};
use crate::rate_limit::RateLimiter;
use crate::relay::{NonceRelay, RelayRequest, SignedDelegation, SignedVote};
use crate::signature::{SignatureDomain, SignatureVerifier};
use crate::store::GovernanceStore;
use crate::timelock::{OperationStatus, OperationView, TimelockOperation, TimelockQueue};
use crate::types::{decimal, Address, HashHex, Power};
use crate::voting::{Tally, Vote, VoteChoice, VotingEngine};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Serialize)]
pub struct VotingPowerSnapshot {
    pub address: Address,
    pub as_of: Timestamp,
    #[serde(with = "decimal")]
    pub balance: Power,
    #[serde(with = "decimal")]
    pub voting_power: Power,
    pub nonce: u64,
    pub delegation: DelegationSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub proposals_reconciled: usize,
    pub operations_expired: usize,
    pub multisig_expired: usize,
    pub rate_limit_entries_evicted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.proposals_reconciled == 0
            && self.operations_expired == 0
            && self.multisig_expired == 0
            && self.rate_limit_entries_evicted == 0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GovernanceStats {
    pub proposals_total: usize,
    pub proposals_by_state: BTreeMap<String, usize>,
    pub votes_cast: usize,
    pub distinct_voters: usize,
    pub total_power: Tally,
    pub operations_by_status: BTreeMap<String, usize>,
    pub multisig_by_status: BTreeMap<String, usize>,
}

pub struct GovernanceEngine {
    config: Arc<GovernanceConfig>,
    store: Arc<dyn GovernanceStore>,
    oracle: Arc<dyn VotingPowerOracle>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    proposals: ProposalManager,
    voting: Arc<VotingEngine>,
    delegations: Arc<DelegationRegistry>,
    timelock: TimelockQueue,
    multisig: MultisigApprovalEngine,
    relay: NonceRelay,
}

impl GovernanceEngine {
    pub fn new(
        config: GovernanceConfig,
        store: Arc<dyn GovernanceStore>,
        oracle: Arc<dyn VotingPowerOracle>,
        verifier: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), clock.clone()));

        let proposals = ProposalManager::new(
            store.clone(),
            oracle.clone(),
            clock.clone(),
            limiter.clone(),
            config.clone(),
        );
        let voting = Arc::new(VotingEngine::new(
            store.clone(),
            oracle.clone(),
            clock.clone(),
            limiter.clone(),
            config.clone(),
        ));
        let delegations = Arc::new(DelegationRegistry::new(
            store.clone(),
            clock.clone(),
            limiter.clone(),
        ));
        let timelock = TimelockQueue::new(store.clone(), clock.clone(), config.clone());
        let multisig = MultisigApprovalEngine::new(
            store.clone(),
            verifier.clone(),
            clock.clone(),
            limiter.clone(),
            config.clone(),
        );
        let relay = NonceRelay::new(
            store.clone(),
            verifier,
            voting.clone(),
            delegations.clone(),
            clock.clone(),
            limiter.clone(),
            SignatureDomain::from(&config.relay),
        );

        info!(
            quorum_bps = config.quorum_bps,
            voting_delay_secs = config.voting_delay_secs,
            voting_period_secs = config.voting_period_secs,
            min_delay_secs = config.timelock.min_delay_secs,
            signers = config.multisig.signers.len(),
            "governance_engine_ready"
        );

        Ok(Self {
            config,
            store,
            oracle,
            clock,
            limiter,
            proposals,
            voting,
            delegations,
            timelock,
            multisig,
            relay,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run a verb inside the request span and log failures by kind
    async fn traced<T, F>(&self, ctx: &RequestContext, verb: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = ctx.span(verb);
        let result = call.instrument(span.clone()).await;
        if let Err(e) = &result {
            let _entered = span.enter();
            match e.kind() {
                ErrorKind::Authorization => warn!(verb, error = %e, "request_denied"),
                ErrorKind::Internal => error!(verb, error = %e, "request_failed"),
                _ => debug!(verb, error = %e, kind = ?e.kind(), "request_rejected"),
            }
        }
        result
    }

    // proposals

    pub async fn create_proposal(
        &self,
        ctx: &RequestContext,
        proposer: &Address,
        new: NewProposal,
    ) -> Result<Proposal> {
        self.traced(ctx, "create_proposal", async {
            ctx.ensure_actor(proposer)?;
            self.proposals.create_proposal(proposer, new).await
        })
        .await
    }

    pub async fn cancel_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: ProposalId,
        actor: &Address,
        reason: &str,
    ) -> Result<Proposal> {
        self.traced(ctx, "cancel_proposal", async {
            ctx.ensure_actor(actor)?;
            let proposal = self.proposals.get(proposal_id).await?;
            self.timelock.ensure_canceller(&proposal, actor)?;
            let updated = self
                .store
                .cancel_proposal(proposal_id, actor, reason.trim(), self.clock.now())
                .await?;
            info!(proposal_id, actor = %actor, "proposal_canceled");
            Ok(updated)
        })
        .await
    }

    pub async fn proposal(&self, proposal_id: ProposalId) -> Result<ProposalView> {
        self.proposals.view(proposal_id).await
    }

    pub async fn list_proposals(&self, query: &ProposalQuery) -> Result<ProposalPage> {
        self.proposals.list(query).await
    }

    // voting

    pub async fn cast_vote(
        &self,
        ctx: &RequestContext,
        proposal_id: ProposalId,
        voter: &Address,
        choice: VoteChoice,
        reason: Option<String>,
    ) -> Result<Vote> {
        self.traced(ctx, "cast_vote", async {
            ctx.ensure_actor(voter)?;
            self.voting.cast_vote(proposal_id, voter, choice, reason).await
        })
        .await
    }

    /// The relayer need not be the voter; the signature proves intent
    pub async fn submit_signed_vote(
        &self,
        ctx: &RequestContext,
        payload: SignedVote,
        signature: &[u8],
    ) -> Result<(RelayRequest, Vote)> {
        self.traced(ctx, "submit_signed_vote", self.relay.submit_signed_vote(payload, signature))
            .await
    }

    pub async fn votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>> {
        let proposal = self.proposals.get(proposal_id).await?;
        self.voting.votes_for(&proposal).await
    }

    pub async fn vote_of(&self, proposal_id: ProposalId, voter: &Address) -> Result<Option<Vote>> {
        self.voting.get_vote(proposal_id, voter).await
    }

    // delegation

    pub async fn delegate(
        &self,
        ctx: &RequestContext,
        delegator: &Address,
        delegatee: &Address,
    ) -> Result<Delegation> {
        self.traced(ctx, "delegate", async {
            ctx.ensure_actor(delegator)?;
            self.delegations.delegate(delegator, delegatee).await
        })
        .await
    }

    pub async fn submit_signed_delegation(
        &self,
        ctx: &RequestContext,
        payload: SignedDelegation,
        signature: &[u8],
    ) -> Result<(RelayRequest, Delegation)> {
        self.traced(
            ctx,
            "submit_signed_delegation",
            self.relay.submit_signed_delegation(payload, signature),
        )
        .await
    }

    pub async fn relay_request(&self, id: &str) -> Result<RelayRequest> {
        self.relay.get(id).await
    }

    pub async fn voting_power(&self, address: &Address) -> Result<VotingPowerSnapshot> {
        let now = self.clock.now();
        let timeout = self.config.oracle_timeout();
        let balance = bounded(timeout, self.oracle.balance_of(address)).await?;
        let voting_power = bounded(timeout, self.oracle.power_at(address, now)).await?;
        Ok(VotingPowerSnapshot {
            address: address.clone(),
            as_of: now,
            balance,
            voting_power,
            nonce: self.relay.nonce_of(address).await?,
            delegation: self.delegations.snapshot(address, now).await?,
        })
    }

    // timelock

    pub async fn queue(
        &self,
        ctx: &RequestContext,
        proposal_id: ProposalId,
        requested_delay: Option<u64>,
        predecessor: Option<HashHex>,
    ) -> Result<TimelockOperation> {
        self.traced(
            ctx,
            "queue",
            self.timelock.queue(proposal_id, requested_delay, predecessor),
        )
        .await
    }

    pub async fn execute(
        &self,
        ctx: &RequestContext,
        operation_hash: &str,
        executor: &Address,
    ) -> Result<TimelockOperation> {
        self.traced(ctx, "execute", async {
            ctx.ensure_actor(executor)?;
            self.timelock.execute(operation_hash, executor).await
        })
        .await
    }

    pub async fn cancel_timelock(
        &self,
        ctx: &RequestContext,
        operation_hash: &str,
        canceller: &Address,
        reason: &str,
    ) -> Result<TimelockOperation> {
        self.traced(ctx, "cancel_timelock", async {
            ctx.ensure_actor(canceller)?;
            self.timelock.cancel(operation_hash, canceller, reason).await
        })
        .await
    }

    pub async fn timelock_status(&self, operation_hash: &str) -> Result<OperationView> {
        self.timelock.get(operation_hash).await
    }

    pub async fn timelock_queue(&self, status: Option<OperationStatus>) -> Result<Vec<OperationView>> {
        self.timelock.list(status).await
    }

    // multisig

    pub async fn create_multisig_proposal(
        &self,
        ctx: &RequestContext,
        proposer: &Address,
        new: NewMultisigProposal,
    ) -> Result<MultisigProposal> {
        self.traced(ctx, "create_multisig_proposal", async {
            ctx.ensure_actor(proposer)?;
            self.multisig.create(proposer, new).await
        })
        .await
    }

    pub async fn sign_multisig_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: MultisigId,
        signer: &Address,
        signature: Vec<u8>,
    ) -> Result<MultisigProposal> {
        self.traced(ctx, "sign_multisig_proposal", async {
            ctx.ensure_actor(signer)?;
            self.multisig.sign(proposal_id, signer, signature).await
        })
        .await
    }

    pub async fn revoke_multisig_signature(
        &self,
        ctx: &RequestContext,
        proposal_id: MultisigId,
        signer: &Address,
    ) -> Result<MultisigProposal> {
        self.traced(ctx, "revoke_multisig_signature", async {
            ctx.ensure_actor(signer)?;
            self.multisig.revoke(proposal_id, signer).await
        })
        .await
    }

    pub async fn execute_multisig_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: MultisigId,
        executor: &Address,
    ) -> Result<MultisigProposal> {
        self.traced(ctx, "execute_multisig_proposal", async {
            ctx.ensure_actor(executor)?;
            self.multisig.execute(proposal_id, executor).await
        })
        .await
    }

    pub async fn cancel_multisig_proposal(
        &self,
        ctx: &RequestContext,
        proposal_id: MultisigId,
        actor: &Address,
    ) -> Result<MultisigProposal> {
        self.traced(ctx, "cancel_multisig_proposal", async {
            ctx.ensure_actor(actor)?;
            self.multisig.cancel(proposal_id, actor).await
        })
        .await
    }

    pub async fn multisig_proposal(&self, proposal_id: MultisigId) -> Result<MultisigView> {
        self.multisig.get(proposal_id).await
    }

    pub async fn list_multisig_proposals(
        &self,
        status: Option<MultisigStatus>,
    ) -> Result<Vec<MultisigProposal>> {
        self.multisig.list(status).await
    }

    // maintenance

    /// Expire lapsed operations and multisig proposals, then bring cached
    /// proposal states in line with the derived ones. Safe to call repeatedly.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let ctx = RequestContext::system();
        self.traced(&ctx, "sweep_expired", async {
            let operations_expired = self.timelock.expire_stale().await?;
            let multisig_expired = self.multisig.expire_stale().await?;

            let now = self.clock.now();
            let mut proposals_reconciled = 0;
            for proposal in self.store.list_proposals(&ProposalQuery::default()).await? {
                if proposal.state_at(now) == proposal.status {
                    continue;
                }
                self.store
                    .update_proposal(proposal.id, &|p| {
                        p.status = p.state_at(now);
                        Ok(())
                    })
                    .await?;
                proposals_reconciled += 1;
            }

            let rate_limit_entries_evicted = self.limiter.prune();

            let report = SweepReport {
                proposals_reconciled,
                operations_expired,
                multisig_expired,
                rate_limit_entries_evicted,
            };
            if !report.is_empty() {
                info!(
                    proposals_reconciled,
                    operations_expired,
                    multisig_expired,
                    rate_limit_entries_evicted,
                    "sweep_completed"
                );
            }
            Ok(report)
        })
        .await
    }

    pub async fn statistics(&self) -> Result<GovernanceStats> {
        let now = self.clock.now();
        let proposals = self.store.list_proposals(&ProposalQuery::default()).await?;

        let mut stats = GovernanceStats {
            proposals_total: proposals.len(),
            ..GovernanceStats::default()
        };
        for state in ProposalState::ALL {
            stats.proposals_by_state.insert(state.to_string(), 0);
        }
        let mut voters = BTreeSet::new();
        for proposal in &proposals {
            *stats
                .proposals_by_state
                .entry(proposal.state_at(now).to_string())
                .or_default() += 1;
            stats.total_power.for_power += &proposal.tally.for_power;
            stats.total_power.against_power += &proposal.tally.against_power;
            stats.total_power.abstain_power += &proposal.tally.abstain_power;

            let votes = self.store.list_votes(proposal.id).await?;
            stats.votes_cast += votes.len();
            voters.extend(votes.into_iter().map(|v| v.voter));
        }
        stats.distinct_voters = voters.len();

        for status in OperationStatus::ALL {
            stats.operations_by_status.insert(status.to_string(), 0);
        }
        for op in self.store.list_operations().await? {
            *stats
                .operations_by_status
                .entry(op.status_at(now).to_string())
                .or_default() += 1;
        }

        for status in MultisigStatus::ALL {
            stats.multisig_by_status.insert(status.to_string(), 0);
        }
        for m in self.store.list_multisig().await? {
            *stats
                .multisig_by_status
                .entry(m.status_at(now).to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }
}
