//! Per-identity sliding window limits for mutating verbs

use crate::clock::{Clock, Timestamp};
use crate::config::{RateLimitsConfig, WindowConfig};
use crate::error::{GovernanceError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitedAction {
    CreateProposal,
    Vote,
    Delegate,
    Signature,
}

impl fmt::Display for RateLimitedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimitedAction::CreateProposal => "create_proposal",
            RateLimitedAction::Vote => "vote",
            RateLimitedAction::Delegate => "delegate",
            RateLimitedAction::Signature => "signature",
        };
        f.write_str(name)
    }
}

pub struct RateLimiter {
    limits: RateLimitsConfig,
    clock: Arc<dyn Clock>,
    history: DashMap<(String, RateLimitedAction), VecDeque<Timestamp>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            history: DashMap::new(),
        }
    }

    fn window_for(&self, action: RateLimitedAction) -> &WindowConfig {
        match action {
            RateLimitedAction::CreateProposal => &self.limits.proposal,
            RateLimitedAction::Vote => &self.limits.vote,
            RateLimitedAction::Delegate => &self.limits.delegate,
            RateLimitedAction::Signature => &self.limits.signature,
        }
    }

    /// Admit and record one request, or reject it with a retry hint.
    /// Rejected requests are not recorded.
    pub fn check(&self, action: RateLimitedAction, identity: &str) -> Result<()> {
        let window = self.window_for(action);
        let now = self.clock.now();

        let mut entry = self
            .history
            .entry((identity.to_ascii_lowercase(), action))
            .or_default();
        while entry
            .front()
            .is_some_and(|&t| t + window.window_secs <= now)
        {
            entry.pop_front();
        }

        if entry.len() >= window.max_requests as usize {
            let oldest = entry.front().copied().unwrap_or(now);
            let retry_after_secs = (oldest + window.window_secs).saturating_sub(now).max(1);
            warn!(
                identity = identity,
                action = %action,
                limit = window.max_requests,
                retry_after_secs,
                "rate_limited"
            );
            return Err(GovernanceError::RateLimited { retry_after_secs });
        }

        entry.push_back(now);
        Ok(())
    }

    /// Drop identities whose every request has left its window. Returns the
    /// number of entries evicted.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.history.len();
        self.history.retain(|(_, action), requests| {
            let window = self.window_for(*action).window_secs;
            requests.back().is_some_and(|&t| t + window > now)
        });
        before.saturating_sub(self.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        let limits = RateLimitsConfig {
            vote: WindowConfig {
                max_requests: 3,
                window_secs: 60,
            },
            ..RateLimitsConfig::default()
        };
        RateLimiter::new(limits, clock)
    }

    #[test]
    fn test_limit_and_retry_after() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock.clone());

        for _ in 0..3 {
            limiter.check(RateLimitedAction::Vote, "alice").unwrap();
            clock.advance(10);
        }
        // first request at 1000, now 1030
        assert_eq!(
            limiter.check(RateLimitedAction::Vote, "alice"),
            Err(GovernanceError::RateLimited {
                retry_after_secs: 30
            })
        );
        let key = ("alice".to_string(), RateLimitedAction::Vote);
        assert_eq!(limiter.history.get(&key).map(|h| h.len()), Some(3));
    }

    #[test]
    fn test_window_slides() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock.clone());

        for _ in 0..3 {
            limiter.check(RateLimitedAction::Vote, "alice").unwrap();
        }
        assert!(limiter.check(RateLimitedAction::Vote, "alice").is_err());

        clock.advance(60);
        assert!(limiter.check(RateLimitedAction::Vote, "alice").is_ok());
    }

    #[test]
    fn test_identities_and_actions_are_independent() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock);

        for _ in 0..3 {
            limiter.check(RateLimitedAction::Vote, "alice").unwrap();
        }
        assert!(limiter.check(RateLimitedAction::Vote, "bob").is_ok());
        assert!(limiter.check(RateLimitedAction::Delegate, "alice").is_ok());
        assert!(limiter.check(RateLimitedAction::Vote, "ALICE").is_err());
    }

    #[test]
    fn test_prune_evicts_idle_identities() {
        let clock = Arc::new(ManualClock::new(1_000));
        let limiter = limiter(clock.clone());

        for n in 0..50 {
            limiter
                .check(RateLimitedAction::Vote, &format!("voter-{}", n))
                .unwrap();
        }
        limiter.check(RateLimitedAction::CreateProposal, "alice").unwrap();
        assert_eq!(limiter.history.len(), 51);
        assert_eq!(limiter.prune(), 0);

        // vote windows are 60s, the proposal window an hour
        clock.advance(60);
        limiter.check(RateLimitedAction::Vote, "voter-0").unwrap();
        assert_eq!(limiter.prune(), 49);
        assert_eq!(limiter.history.len(), 2);

        clock.advance(3_600);
        assert_eq!(limiter.prune(), 2);
        assert!(limiter.history.is_empty());
    }
}
