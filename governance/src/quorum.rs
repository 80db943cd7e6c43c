//! Quorum and outcome calculation
//!
//! Quorum counts every participating choice, abstain included. Success
//! requires strictly more For than Against power.

use crate::config::MAX_BPS;
use crate::types::Power;
use crate::voting::Tally;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub quorum_reached: bool,
    pub vote_succeeded: bool,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.quorum_reached && self.vote_succeeded
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuorumCalculator {
    quorum_bps: u32,
}

impl QuorumCalculator {
    pub fn new(quorum_bps: u32) -> Self {
        Self {
            quorum_bps: quorum_bps.min(MAX_BPS),
        }
    }

    /// Quorum bar derived from supply at the proposal's snapshot. Fixed at
    /// creation so later mints and burns cannot move it.
    pub fn threshold(&self, total_supply_at_snapshot: &Power) -> Power {
        total_supply_at_snapshot * Power::from(self.quorum_bps) / Power::from(MAX_BPS)
    }
}

pub fn quorum_reached(tally: &Tally, threshold: &Power) -> bool {
    tally.total() >= *threshold
}

pub fn vote_succeeded(tally: &Tally) -> bool {
    tally.for_power > tally.against_power
}

pub fn outcome(tally: &Tally, threshold: &Power) -> Outcome {
    Outcome {
        quorum_reached: quorum_reached(tally, threshold),
        vote_succeeded: vote_succeeded(tally),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::VoteChoice;

    fn tally(for_power: u64, against: u64, abstain: u64) -> Tally {
        let mut t = Tally::default();
        t.add(VoteChoice::For, &Power::from(for_power));
        t.add(VoteChoice::Against, &Power::from(against));
        t.add(VoteChoice::Abstain, &Power::from(abstain));
        t
    }

    #[test]
    fn test_threshold_is_fraction_of_supply() {
        let calc = QuorumCalculator::new(400);
        assert_eq!(calc.threshold(&Power::from(11_000u32)), Power::from(440u32));
        assert_eq!(calc.threshold(&Power::from(0u32)), Power::from(0u32));
    }

    #[test]
    fn test_quorum_boundary() {
        let threshold = Power::from(440u32);
        assert!(!quorum_reached(&tally(200, 100, 139), &threshold));
        assert!(quorum_reached(&tally(200, 100, 140), &threshold));
    }

    #[test]
    fn test_abstain_only_reaches_quorum_but_does_not_pass() {
        let threshold = Power::from(440u32);
        let result = outcome(&tally(0, 0, 440), &threshold);
        assert!(result.quorum_reached);
        assert!(!result.vote_succeeded);
        assert!(!result.passed());
    }

    #[test]
    fn test_tie_is_not_success() {
        assert!(!vote_succeeded(&tally(500, 500, 0)));
        assert!(vote_succeeded(&tally(501, 500, 0)));
    }

    #[test]
    fn test_large_supply_does_not_overflow() {
        let supply = Power::from(10u32).pow(70);
        let calc = QuorumCalculator::new(10_000);
        assert_eq!(calc.threshold(&supply), supply);
    }
}
