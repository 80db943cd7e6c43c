//! Proposals and their lifecycle
//!
//! A proposal's state is never trusted from a stored flag. [`Proposal::state_at`]
//! derives it from timestamps, tallies and settlement markers; the cached
//! `status` field only exists for cheap listing and is reconciled on read.

use crate::clock::{Clock, Timestamp};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::hash::{sha256_hex, FieldHasher};
use crate::oracle::{bounded, VotingPowerOracle};
use crate::quorum::{self, Outcome, QuorumCalculator};
use crate::rate_limit::{RateLimitedAction, RateLimiter};
use crate::store::GovernanceStore;
use crate::timelock::{OperationStatus, Settlement, TimelockOperation};
use crate::types::{decimal, parse_power, Action, Address, HashHex, Power, ProposalCategory};
use crate::voting::{Tally, Vote};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type ProposalId = u64;

const FINGERPRINT_TAG: &str = "CIVIC_PROPOSAL_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Pending,
    Active,
    Canceled,
    Defeated,
    Succeeded,
    Queued,
    Expired,
    Executed,
}

impl ProposalState {
    pub const ALL: [ProposalState; 8] = [
        ProposalState::Pending,
        ProposalState::Active,
        ProposalState::Canceled,
        ProposalState::Defeated,
        ProposalState::Succeeded,
        ProposalState::Queued,
        ProposalState::Expired,
        ProposalState::Executed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalState::Canceled
                | ProposalState::Defeated
                | ProposalState::Executed
                | ProposalState::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Pending => "Pending",
            ProposalState::Active => "Active",
            ProposalState::Canceled => "Canceled",
            ProposalState::Defeated => "Defeated",
            ProposalState::Succeeded => "Succeeded",
            ProposalState::Queued => "Queued",
            ProposalState::Expired => "Expired",
            ProposalState::Executed => "Executed",
        }
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalState {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        ProposalState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GovernanceError::InvalidInput(format!("unknown proposal state: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer: Address,
    pub category: ProposalCategory,
    pub title: String,
    pub description: String,
    pub actions: Vec<Action>,
    pub description_hash: HashHex,
    /// Hash of the action list plus description hash; identifies the
    /// logical proposal for timelock lookups
    pub fingerprint: HashHex,
    pub created_at: Timestamp,
    /// Time reference used for voting power and supply lookups
    pub snapshot: Timestamp,
    pub voting_starts_at: Timestamp,
    pub voting_ends_at: Timestamp,
    #[serde(with = "decimal")]
    pub quorum_threshold: Power,
    pub tally: Tally,
    /// Cached copy of the derived state; see [`Proposal::reconcile`]
    pub status: ProposalState,
    pub operation_hash: Option<HashHex>,
    pub queued_at: Option<Timestamp>,
    pub eta: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
    pub canceled_by: Option<Address>,
    pub executed_at: Option<Timestamp>,
    pub executed_by: Option<Address>,
}

impl Proposal {
    pub fn outcome(&self) -> Outcome {
        quorum::outcome(&self.tally, &self.quorum_threshold)
    }

    pub fn is_voting_open(&self, now: Timestamp) -> bool {
        self.canceled_at.is_none() && now >= self.voting_starts_at && now < self.voting_ends_at
    }

    /// Pure lifecycle function over stored facts
    pub fn state_at(&self, now: Timestamp) -> ProposalState {
        if self.canceled_at.is_some() {
            return ProposalState::Canceled;
        }
        if self.executed_at.is_some() {
            return ProposalState::Executed;
        }
        if let Some(expires_at) = self.expires_at {
            return if now >= expires_at {
                ProposalState::Expired
            } else {
                ProposalState::Queued
            };
        }
        if now < self.voting_starts_at {
            return ProposalState::Pending;
        }
        if now < self.voting_ends_at {
            return ProposalState::Active;
        }
        if self.outcome().passed() {
            ProposalState::Succeeded
        } else {
            ProposalState::Defeated
        }
    }

    /// Derived state, logging when the cached copy has drifted
    pub fn reconcile(&self, now: Timestamp) -> ProposalState {
        let derived = self.state_at(now);
        if derived != self.status {
            debug!(
                proposal_id = self.id,
                cached = %self.status,
                derived = %derived,
                "proposal_state_reconciled"
            );
        }
        derived
    }

    pub fn apply_vote(&mut self, vote: &Vote) -> Result<()> {
        if !self.is_voting_open(vote.cast_at) {
            return Err(GovernanceError::VotingNotActive(
                self.state_at(vote.cast_at).to_string(),
            ));
        }
        self.tally.add(vote.choice, &vote.power);
        self.status = ProposalState::Active;
        Ok(())
    }

    pub fn mark_queued(
        &mut self,
        operation_hash: &str,
        queued_at: Timestamp,
        eta: Timestamp,
        expires_at: Timestamp,
    ) -> Result<()> {
        let state = self.state_at(queued_at);
        if state == ProposalState::Queued {
            return Err(GovernanceError::AlreadyQueued(operation_hash.to_string()));
        }
        if state != ProposalState::Succeeded {
            return Err(GovernanceError::InvalidState {
                expected: ProposalState::Succeeded.to_string(),
                actual: state.to_string(),
            });
        }
        self.operation_hash = Some(operation_hash.to_string());
        self.queued_at = Some(queued_at);
        self.eta = Some(eta);
        self.expires_at = Some(expires_at);
        self.status = ProposalState::Queued;
        Ok(())
    }

    /// Cancel before queueing; queued proposals are cancelled through
    /// their timelock operation
    pub fn cancel_unqueued(&mut self, actor: &Address, at: Timestamp) -> Result<()> {
        let state = self.state_at(at);
        if !matches!(state, ProposalState::Pending | ProposalState::Active) {
            return Err(GovernanceError::InvalidState {
                expected: "Pending or Active".to_string(),
                actual: state.to_string(),
            });
        }
        self.canceled_at = Some(at);
        self.canceled_by = Some(actor.clone());
        self.status = ProposalState::Canceled;
        Ok(())
    }

    /// Cancel from any cancellable state. `queued` must be this proposal's
    /// operation when the proposal is queued; it is cancelled alongside.
    pub fn cancel(
        &mut self,
        actor: &Address,
        reason: &str,
        at: Timestamp,
        queued: Option<&mut TimelockOperation>,
    ) -> Result<()> {
        if self.state_at(at) != ProposalState::Queued {
            return self.cancel_unqueued(actor, at);
        }
        let op = queued.ok_or_else(|| {
            GovernanceError::Internal(format!("proposal {} is queued without an operation", self.id))
        })?;
        op.settle(
            &Settlement::Cancel {
                actor: actor.clone(),
                reason: reason.to_string(),
            },
            at,
            true,
        )?;
        self.apply_settlement(op);
        Ok(())
    }

    /// Mirror a settled operation onto its parent proposal
    pub fn apply_settlement(&mut self, op: &TimelockOperation) {
        let at = op.settled_at;
        match op.status {
            OperationStatus::Executed => {
                self.executed_at = at;
                self.executed_by = op.executed_by.clone();
                self.status = ProposalState::Executed;
            }
            OperationStatus::Cancelled => {
                self.canceled_at = at;
                self.canceled_by = op.cancelled_by.clone();
                self.status = ProposalState::Canceled;
            }
            OperationStatus::Expired => self.status = ProposalState::Expired,
            OperationStatus::Queued | OperationStatus::Ready => {}
        }
    }
}

/// Caller input for a new proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProposal {
    pub title: String,
    pub description: String,
    pub category: ProposalCategory,
    pub actions: Vec<Action>,
}

/// Build actions from parallel target/value/payload lists
pub fn actions_from_parts(
    targets: &[String],
    values: &[String],
    payloads: &[String],
) -> Result<Vec<Action>> {
    if targets.len() != values.len() || targets.len() != payloads.len() {
        return Err(GovernanceError::InvalidActions(format!(
            "length mismatch: {} targets, {} values, {} payloads",
            targets.len(),
            values.len(),
            payloads.len()
        )));
    }
    targets
        .iter()
        .zip(values)
        .zip(payloads)
        .map(|((target, value), payload)| {
            let payload = hex::decode(payload.trim_start_matches("0x")).map_err(|e| {
                GovernanceError::InvalidActions(format!("payload is not hex: {}", e))
            })?;
            Ok(Action {
                target: target.parse()?,
                value: parse_power(value)?,
                payload,
            })
        })
        .collect()
}

pub fn description_hash(description: &str) -> HashHex {
    sha256_hex(description.as_bytes())
}

pub fn fingerprint(actions: &[Action], description_hash: &str) -> HashHex {
    let mut h = FieldHasher::new(FINGERPRINT_TAG);
    h.u64(actions.len() as u64);
    for action in actions {
        h.str(action.target.as_str())
            .uint(&action.value)
            .bytes(&action.payload);
    }
    h.str(description_hash);
    h.finish_hex()
}

pub fn validate_new_proposal(new: &NewProposal, config: &GovernanceConfig) -> Result<()> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(GovernanceError::InvalidProposal("title is required".to_string()));
    }
    if title.chars().count() > config.max_title_len {
        return Err(GovernanceError::InvalidProposal(format!(
            "title exceeds {} characters",
            config.max_title_len
        )));
    }
    if new.description.trim().is_empty() {
        return Err(GovernanceError::InvalidProposal(
            "description is required".to_string(),
        ));
    }
    if new.description.chars().count() > config.max_description_len {
        return Err(GovernanceError::InvalidProposal(format!(
            "description exceeds {} characters",
            config.max_description_len
        )));
    }
    if !config.allowed_categories.contains(&new.category) {
        return Err(GovernanceError::InvalidCategory(new.category.to_string()));
    }
    if new.actions.is_empty() {
        return Err(GovernanceError::InvalidActions(
            "at least one action is required".to_string(),
        ));
    }
    if new.actions.len() > config.max_actions {
        return Err(GovernanceError::InvalidActions(format!(
            "{} actions exceeds the maximum of {}",
            new.actions.len(),
            config.max_actions
        )));
    }
    Ok(())
}

/// Typed listing filter. Category and proposer are matched by the store;
/// state is matched by the caller against the derived state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalQuery {
    pub state: Option<ProposalState>,
    pub category: Option<ProposalCategory>,
    pub proposer: Option<Address>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ProposalQuery {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 100;

    pub fn matches_record(&self, p: &Proposal) -> bool {
        self.category.map_or(true, |c| c == p.category)
            && self.proposer.as_ref().map_or(true, |a| *a == p.proposer)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// A proposal together with its derived state
#[derive(Debug, Clone, Serialize)]
pub struct ProposalView {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub state: ProposalState,
    pub quorum_reached: bool,
    pub vote_succeeded: bool,
}

impl ProposalView {
    pub fn new(proposal: Proposal, now: Timestamp) -> Self {
        let state = proposal.reconcile(now);
        let outcome = proposal.outcome();
        Self {
            proposal,
            state,
            quorum_reached: outcome.quorum_reached,
            vote_succeeded: outcome.vote_succeeded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalPage {
    pub items: Vec<ProposalView>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Creation, eligibility checks and reads over the proposal table
pub struct ProposalManager {
    store: Arc<dyn GovernanceStore>,
    oracle: Arc<dyn VotingPowerOracle>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    config: Arc<GovernanceConfig>,
}

impl ProposalManager {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        oracle: Arc<dyn VotingPowerOracle>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        Self {
            store,
            oracle,
            clock,
            limiter,
            config,
        }
    }

    pub async fn create_proposal(&self, proposer: &Address, new: NewProposal) -> Result<Proposal> {
        self.limiter
            .check(RateLimitedAction::CreateProposal, proposer.as_str())?;
        validate_new_proposal(&new, &self.config)?;

        let now = self.clock.now();
        let timeout = self.config.oracle_timeout();

        let required = Power::from(self.config.proposal_threshold);
        if required > Power::from(0u32) {
            let power = bounded(timeout, self.oracle.power_at(proposer, now)).await?;
            if power < required {
                warn!(proposer = %proposer, power = %power, required = %required, "proposal_threshold_not_met");
                return Err(GovernanceError::InsufficientVotingPower {
                    required: required.to_string(),
                    available: power.to_string(),
                });
            }
        }

        let open = self
            .store
            .list_proposals(&ProposalQuery {
                proposer: Some(proposer.clone()),
                ..Default::default()
            })
            .await?
            .iter()
            .filter(|p| {
                matches!(
                    p.state_at(now),
                    ProposalState::Pending | ProposalState::Active
                )
            })
            .count();
        if open >= self.config.max_active_proposals_per_proposer {
            return Err(GovernanceError::TooManyActiveProposals {
                proposer: proposer.to_string(),
                open,
                max: self.config.max_active_proposals_per_proposer,
            });
        }

        let supply = bounded(timeout, self.oracle.total_supply_at(now)).await?;
        let quorum_threshold = QuorumCalculator::new(self.config.quorum_bps).threshold(&supply);

        let description_hash = description_hash(&new.description);
        let voting_starts_at = now + self.config.voting_delay_secs;
        let proposal = Proposal {
            id: self.store.next_proposal_id().await?,
            proposer: proposer.clone(),
            category: new.category,
            title: new.title.trim().to_string(),
            fingerprint: fingerprint(&new.actions, &description_hash),
            description: new.description,
            actions: new.actions,
            description_hash,
            created_at: now,
            snapshot: now,
            voting_starts_at,
            voting_ends_at: voting_starts_at + self.config.voting_period_secs,
            quorum_threshold,
            tally: Tally::default(),
            status: ProposalState::Pending,
            operation_hash: None,
            queued_at: None,
            eta: None,
            expires_at: None,
            canceled_at: None,
            canceled_by: None,
            executed_at: None,
            executed_by: None,
        };
        let proposal = Proposal {
            status: proposal.state_at(now),
            ..proposal
        };

        self.store.insert_proposal(proposal.clone()).await?;

        info!(
            proposal_id = proposal.id,
            proposer = %proposal.proposer,
            category = %proposal.category,
            actions = proposal.actions.len(),
            voting_starts_at = proposal.voting_starts_at,
            voting_ends_at = proposal.voting_ends_at,
            quorum = %proposal.quorum_threshold,
            "proposal_created"
        );
        Ok(proposal)
    }

    pub async fn get(&self, id: ProposalId) -> Result<Proposal> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or(GovernanceError::ProposalNotFound(id))
    }

    pub async fn view(&self, id: ProposalId) -> Result<ProposalView> {
        Ok(ProposalView::new(self.get(id).await?, self.clock.now()))
    }

    pub async fn list(&self, query: &ProposalQuery) -> Result<ProposalPage> {
        let now = self.clock.now();
        let mut views: Vec<ProposalView> = self
            .store
            .list_proposals(query)
            .await?
            .into_iter()
            .map(|p| ProposalView::new(p, now))
            .filter(|v| query.state.map_or(true, |s| s == v.state))
            .collect();
        views.sort_by(|a, b| b.proposal.id.cmp(&a.proposal.id));

        let total = views.len();
        let limit = query.effective_limit();
        let items = views.into_iter().skip(query.offset).take(limit).collect();
        Ok(ProposalPage {
            items,
            total,
            offset: query.offset,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::VoteChoice;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn action() -> Action {
        Action {
            target: addr(0xaa),
            value: Power::from(0u32),
            payload: vec![1, 2, 3],
        }
    }

    fn proposal(threshold: u64) -> Proposal {
        let description_hash = description_hash("fund the audit");
        Proposal {
            id: 1,
            proposer: addr(1),
            category: ProposalCategory::Treasury,
            title: "Audit".to_string(),
            description: "fund the audit".to_string(),
            actions: vec![action()],
            fingerprint: fingerprint(&[action()], &description_hash),
            description_hash,
            created_at: 1_000,
            snapshot: 1_000,
            voting_starts_at: 2_000,
            voting_ends_at: 3_000,
            quorum_threshold: Power::from(threshold),
            tally: Tally::default(),
            status: ProposalState::Pending,
            operation_hash: None,
            queued_at: None,
            eta: None,
            expires_at: None,
            canceled_at: None,
            canceled_by: None,
            executed_at: None,
            executed_by: None,
        }
    }

    fn vote(choice: VoteChoice, power: u64, at: Timestamp) -> Vote {
        Vote {
            proposal_id: 1,
            voter: addr(9),
            choice,
            power: Power::from(power),
            reason: None,
            cast_at: at,
        }
    }

    #[test]
    fn test_lifecycle_windows() {
        let p = proposal(440);
        assert_eq!(p.state_at(1_999), ProposalState::Pending);
        assert_eq!(p.state_at(2_000), ProposalState::Active);
        assert_eq!(p.state_at(2_999), ProposalState::Active);
        assert_eq!(p.state_at(3_000), ProposalState::Defeated);
    }

    #[test]
    fn test_succeeds_with_quorum_and_majority() {
        let mut p = proposal(440);
        p.apply_vote(&vote(VoteChoice::For, 5_000, 2_500)).unwrap();
        assert_eq!(p.state_at(3_000), ProposalState::Succeeded);
    }

    #[test]
    fn test_tie_is_defeated() {
        let mut p = proposal(10);
        p.apply_vote(&vote(VoteChoice::For, 100, 2_100)).unwrap();
        p.apply_vote(&vote(VoteChoice::Against, 100, 2_200)).unwrap();
        assert_eq!(p.state_at(3_000), ProposalState::Defeated);
    }

    #[test]
    fn test_vote_outside_window_rejected_without_tally_change() {
        let mut p = proposal(10);
        let before = p.tally.clone();
        assert!(matches!(
            p.apply_vote(&vote(VoteChoice::For, 1, 1_500)),
            Err(GovernanceError::VotingNotActive(_))
        ));
        assert!(matches!(
            p.apply_vote(&vote(VoteChoice::For, 1, 3_000)),
            Err(GovernanceError::VotingNotActive(_))
        ));
        assert_eq!(p.tally, before);
    }

    #[test]
    fn test_queue_and_expiry() {
        let mut p = proposal(10);
        p.apply_vote(&vote(VoteChoice::For, 100, 2_100)).unwrap();
        p.mark_queued("op", 3_000, 5_000, 6_000).unwrap();
        assert_eq!(p.state_at(5_999), ProposalState::Queued);
        assert_eq!(p.state_at(6_000), ProposalState::Expired);
        assert!(matches!(
            p.mark_queued("op", 3_001, 5_000, 6_000),
            Err(GovernanceError::AlreadyQueued(_))
        ));
    }

    #[test]
    fn test_queue_requires_success() {
        let mut p = proposal(10);
        assert!(matches!(
            p.mark_queued("op", 3_000, 5_000, 6_000),
            Err(GovernanceError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cancel_only_before_queue() {
        let mut p = proposal(10);
        p.cancel_unqueued(&addr(1), 2_500).unwrap();
        assert_eq!(p.state_at(2_600), ProposalState::Canceled);
        assert!(p.cancel_unqueued(&addr(1), 2_700).is_err());
    }

    #[test]
    fn test_reconcile_prefers_derived_state() {
        let mut p = proposal(10);
        p.status = ProposalState::Pending;
        assert_eq!(p.reconcile(2_500), ProposalState::Active);
    }

    #[test]
    fn test_fingerprint_depends_on_actions_and_description() {
        let h = description_hash("a");
        let base = fingerprint(&[action()], &h);
        assert_eq!(base, fingerprint(&[action()], &h));
        assert_ne!(base, fingerprint(&[action()], &description_hash("b")));

        let mut other = action();
        other.payload.push(4);
        assert_ne!(base, fingerprint(&[other], &h));
    }

    #[test]
    fn test_actions_from_parts_requires_equal_lengths() {
        let target = addr(2).to_string();
        let ok = actions_from_parts(
            &[target.clone()],
            &["5".to_string()],
            &["0xdeadbeef".to_string()],
        )
        .unwrap();
        assert_eq!(ok[0].payload, vec![0xde, 0xad, 0xbe, 0xef]);

        let err = actions_from_parts(&[target], &[], &["0x".to_string()]);
        assert!(matches!(err, Err(GovernanceError::InvalidActions(_))));
    }

    #[test]
    fn test_validate_limits() {
        let config = GovernanceConfig::default();
        let mut new = NewProposal {
            title: "t".to_string(),
            description: "d".to_string(),
            category: ProposalCategory::Community,
            actions: vec![],
        };
        assert!(matches!(
            validate_new_proposal(&new, &config),
            Err(GovernanceError::InvalidActions(_))
        ));
        new.actions = vec![action(); 11];
        assert!(validate_new_proposal(&new, &config).is_err());
        new.actions = vec![action(); 10];
        assert!(validate_new_proposal(&new, &config).is_ok());

        let narrow = GovernanceConfig {
            allowed_categories: vec![ProposalCategory::Treasury],
            ..GovernanceConfig::default()
        };
        assert!(matches!(
            validate_new_proposal(&new, &narrow),
            Err(GovernanceError::InvalidCategory(_))
        ));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("queued".parse::<ProposalState>().unwrap(), ProposalState::Queued);
        assert!("done".parse::<ProposalState>().is_err());
    }
}
