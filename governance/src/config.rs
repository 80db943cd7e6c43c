//! Engine configuration
//!
//! Every field has a default so a partial TOML file (or none at all) yields a
//! working configuration. Call [`GovernanceConfig::validate`] after loading.

use crate::error::{GovernanceError, Result};
use crate::types::{Address, ProposalCategory};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SECS_PER_DAY: u64 = 86_400;
pub const MAX_BPS: u32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Delay between creation and the start of voting
    pub voting_delay_secs: u64,
    /// Length of the voting window
    pub voting_period_secs: u64,
    /// Quorum in basis points of total supply at creation
    pub quorum_bps: u32,
    /// Minimum voting power needed to create a proposal
    pub proposal_threshold: u128,
    pub max_actions: usize,
    pub max_active_proposals_per_proposer: usize,
    pub max_title_len: usize,
    pub max_description_len: usize,
    pub allowed_categories: Vec<ProposalCategory>,
    /// Guardians allowed to cancel any proposal or queued operation
    pub cancellers: Vec<Address>,
    pub oracle_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    pub timelock: TimelockConfig,
    pub multisig: MultisigConfig,
    pub relay: RelayConfig,
    pub rate_limits: RateLimitsConfig,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            voting_delay_secs: SECS_PER_DAY,
            voting_period_secs: 7 * SECS_PER_DAY,
            quorum_bps: 400,
            proposal_threshold: 0,
            max_actions: 10,
            max_active_proposals_per_proposer: 3,
            max_title_len: 200,
            max_description_len: 20_000,
            allowed_categories: ProposalCategory::ALL.to_vec(),
            cancellers: Vec::new(),
            oracle_timeout_ms: 2_000,
            sweep_interval_secs: 60,
            timelock: TimelockConfig::default(),
            multisig: MultisigConfig::default(),
            relay: RelayConfig::default(),
            rate_limits: RateLimitsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelockConfig {
    pub min_delay_secs: u64,
    /// Upper bound on a delay requested at queue time
    pub max_delay_secs: u64,
    /// Execution window after the ETA; past it the operation expires
    pub grace_period_secs: u64,
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 2 * SECS_PER_DAY,
            max_delay_secs: 30 * SECS_PER_DAY,
            grace_period_secs: 14 * SECS_PER_DAY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MultisigConfig {
    pub signers: Vec<Address>,
    pub required_signatures: u32,
    pub max_duration_days: u64,
}

impl Default for MultisigConfig {
    fn default() -> Self {
        Self {
            signers: Vec::new(),
            required_signatures: 2,
            max_duration_days: 30,
        }
    }
}

/// Signature domain shared by signed votes, signed delegations and
/// multisig approvals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub domain_name: String,
    pub domain_version: String,
    pub chain_id: u64,
    pub verifying_contract: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            domain_name: "CivicGovernor".to_string(),
            domain_version: "1".to_string(),
            chain_id: 1,
            verifying_contract: "0x0000000000000000000000000000000000000000".to_string(),
        }
    }
}

/// One sliding window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub proposal: WindowConfig,
    pub vote: WindowConfig,
    pub delegate: WindowConfig,
    pub signature: WindowConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            proposal: WindowConfig {
                max_requests: 5,
                window_secs: 3_600,
            },
            vote: WindowConfig {
                max_requests: 60,
                window_secs: 60,
            },
            delegate: WindowConfig {
                max_requests: 10,
                window_secs: 3_600,
            },
            signature: WindowConfig {
                max_requests: 30,
                window_secs: 60,
            },
        }
    }
}

impl GovernanceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| GovernanceError::InvalidConfig(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GovernanceError::InvalidConfig(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(GovernanceError::InvalidConfig(msg.to_string()));

        if self.voting_period_secs == 0 {
            return invalid("voting_period_secs must be greater than zero");
        }
        if self.quorum_bps > MAX_BPS {
            return invalid("quorum_bps cannot exceed 10000");
        }
        if self.max_actions == 0 {
            return invalid("max_actions must be greater than zero");
        }
        if self.allowed_categories.is_empty() {
            return invalid("allowed_categories cannot be empty");
        }
        if self.oracle_timeout_ms == 0 {
            return invalid("oracle_timeout_ms must be greater than zero");
        }
        if self.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be greater than zero");
        }
        if self.timelock.max_delay_secs < self.timelock.min_delay_secs {
            return invalid("timelock.max_delay_secs cannot be below min_delay_secs");
        }
        if self.timelock.grace_period_secs == 0 {
            return invalid("timelock.grace_period_secs must be greater than zero");
        }
        if self.multisig.required_signatures == 0 {
            return invalid("multisig.required_signatures must be greater than zero");
        }
        if !self.multisig.signers.is_empty()
            && self.multisig.required_signatures as usize > self.multisig.signers.len()
        {
            return invalid("multisig.required_signatures exceeds the signer roster");
        }
        if self.multisig.max_duration_days == 0 {
            return invalid("multisig.max_duration_days must be greater than zero");
        }
        for window in [
            &self.rate_limits.proposal,
            &self.rate_limits.vote,
            &self.rate_limits.delegate,
            &self.rate_limits.signature,
        ] {
            if window.max_requests == 0 || window.window_secs == 0 {
                return invalid("rate limit windows must be non-zero");
            }
        }
        Ok(())
    }
}
