//! Token-weighted voting
//!
//! A voter gets exactly one vote per proposal. Their power is read from the
//! oracle at the proposal snapshot when the vote is cast and frozen into the
//! vote record.

use crate::clock::{Clock, Timestamp};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::oracle::{bounded, VotingPowerOracle};
use crate::proposal::{Proposal, ProposalId};
use crate::rate_limit::{RateLimitedAction, RateLimiter};
use crate::store::GovernanceStore;
use crate::types::{decimal, Address, Power};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub const MAX_REASON_LEN: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteChoice {
    Against,
    For,
    Abstain,
}

impl VoteChoice {
    pub fn as_u8(&self) -> u8 {
        match self {
            VoteChoice::Against => 0,
            VoteChoice::For => 1,
            VoteChoice::Abstain => 2,
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoteChoice::Against => "Against",
            VoteChoice::For => "For",
            VoteChoice::Abstain => "Abstain",
        };
        f.write_str(name)
    }
}

/// Accepts the names and the 0/1/2 wire codes
impl FromStr for VoteChoice {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "against" => Ok(VoteChoice::Against),
            "1" | "for" => Ok(VoteChoice::For),
            "2" | "abstain" => Ok(VoteChoice::Abstain),
            other => Err(GovernanceError::InvalidInput(format!(
                "unknown vote choice: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    #[serde(with = "decimal")]
    pub for_power: Power,
    #[serde(with = "decimal")]
    pub against_power: Power,
    #[serde(with = "decimal")]
    pub abstain_power: Power,
}

impl Tally {
    pub fn add(&mut self, choice: VoteChoice, power: &Power) {
        let bucket = match choice {
            VoteChoice::For => &mut self.for_power,
            VoteChoice::Against => &mut self.against_power,
            VoteChoice::Abstain => &mut self.abstain_power,
        };
        *bucket += power;
    }

    pub fn total(&self) -> Power {
        &self.for_power + &self.against_power + &self.abstain_power
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: ProposalId,
    pub voter: Address,
    pub choice: VoteChoice,
    #[serde(with = "decimal")]
    pub power: Power,
    pub reason: Option<String>,
    pub cast_at: Timestamp,
}

pub struct VotingEngine {
    store: Arc<dyn GovernanceStore>,
    oracle: Arc<dyn VotingPowerOracle>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
    config: Arc<GovernanceConfig>,
}

impl VotingEngine {
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

    pub async fn cast_vote(
        &self,
        proposal_id: ProposalId,
        voter: &Address,
        choice: VoteChoice,
        reason: Option<String>,
    ) -> Result<Vote> {
        self.limiter.check(RateLimitedAction::Vote, voter.as_str())?;
        self.cast_admitted(proposal_id, voter, choice, reason).await
    }

    /// Cast a vote whose caller has already passed rate limiting
    pub(crate) async fn cast_admitted(
        &self,
        proposal_id: ProposalId,
        voter: &Address,
        choice: VoteChoice,
        reason: Option<String>,
    ) -> Result<Vote> {
        let reason = normalize_reason(reason)?;
        let proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or(GovernanceError::ProposalNotFound(proposal_id))?;

        let now = self.clock.now();
        if !proposal.is_voting_open(now) {
            return Err(GovernanceError::VotingNotActive(
                proposal.state_at(now).to_string(),
            ));
        }
        // cheap pre-check; the store insert is the authoritative one
        if self.store.get_vote(proposal_id, voter).await?.is_some() {
            debug!(proposal_id, voter = %voter, "duplicate_vote_rejected");
            return Err(GovernanceError::AlreadyVoted {
                proposal_id,
                voter: voter.to_string(),
            });
        }

        let power = bounded(
            self.config.oracle_timeout(),
            self.oracle.power_at(voter, proposal.snapshot),
        )
        .await?;
        if power == BigUint::from(0u32) {
            return Err(GovernanceError::NoVotingPower(voter.to_string()));
        }

        let vote = Vote {
            proposal_id,
            voter: voter.clone(),
            choice,
            power,
            reason,
            cast_at: self.clock.now(),
        };
        let updated = self.store.record_vote(vote.clone()).await?;

        info!(
            proposal_id,
            voter = %voter,
            choice = %choice,
            power = %vote.power,
            for_power = %updated.tally.for_power,
            against_power = %updated.tally.against_power,
            abstain_power = %updated.tally.abstain_power,
            "vote_cast"
        );
        Ok(vote)
    }

    pub async fn get_vote(&self, proposal_id: ProposalId, voter: &Address) -> Result<Option<Vote>> {
        self.store.get_vote(proposal_id, voter).await
    }

    pub async fn votes_for(&self, proposal: &Proposal) -> Result<Vec<Vote>> {
        self.store.list_votes(proposal.id).await
    }
}

fn normalize_reason(reason: Option<String>) -> Result<Option<String>> {
    match reason.map(|r| r.trim().to_string()) {
        Some(r) if r.is_empty() => Ok(None),
        Some(r) if r.chars().count() > MAX_REASON_LEN => Err(GovernanceError::InvalidInput(
            format!("reason exceeds {} characters", MAX_REASON_LEN),
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parsing() {
        assert_eq!("for".parse::<VoteChoice>().unwrap(), VoteChoice::For);
        assert_eq!("0".parse::<VoteChoice>().unwrap(), VoteChoice::Against);
        assert_eq!(" Abstain ".parse::<VoteChoice>().unwrap(), VoteChoice::Abstain);
        assert!("yes".parse::<VoteChoice>().is_err());
        assert_eq!(VoteChoice::Abstain.as_u8(), 2);
    }

    #[test]
    fn test_tally_buckets() {
        let mut tally = Tally::default();
        tally.add(VoteChoice::For, &Power::from(7u32));
        tally.add(VoteChoice::For, &Power::from(3u32));
        tally.add(VoteChoice::Abstain, &Power::from(5u32));
        assert_eq!(tally.for_power, Power::from(10u32));
        assert_eq!(tally.against_power, Power::from(0u32));
        assert_eq!(tally.total(), Power::from(15u32));
    }

    #[test]
    fn test_reason_normalization() {
        assert_eq!(normalize_reason(Some("  ".to_string())).unwrap(), None);
        assert_eq!(
            normalize_reason(Some(" ok ".to_string())).unwrap(),
            Some("ok".to_string())
        );
        assert!(normalize_reason(Some("x".repeat(MAX_REASON_LEN + 1))).is_err());
    }
}
