//! Delegation history
//!
//! Rows are never edited in place except to stamp `revoked_at` on the row a
//! new delegation replaces, so the delegatee of any account can be answered
//! for any past instant.

use crate::clock::{Clock, Timestamp};
use crate::error::Result;
use crate::rate_limit::{RateLimitedAction, RateLimiter};
use crate::store::GovernanceStore;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: Address,
    pub delegatee: Address,
    pub effective_from: Timestamp,
    pub revoked_at: Option<Timestamp>,
}

impl Delegation {
    pub fn is_active_at(&self, at: Timestamp) -> bool {
        self.effective_from <= at && self.revoked_at.map_or(true, |revoked| revoked > at)
    }

    pub fn is_self(&self) -> bool {
        self.delegator == self.delegatee
    }
}

/// Delegatee in effect at `at` among one delegator's history
pub fn delegatee_at(history: &[Delegation], at: Timestamp) -> Option<&Address> {
    history
        .iter()
        .rev()
        .find(|d| d.is_active_at(at))
        .map(|d| &d.delegatee)
}

/// Accounts whose delegation pointed at the delegatee at `at`, one hop only.
/// `rows` is every delegation row ever naming the delegatee.
pub fn delegators_at(rows: &[Delegation], at: Timestamp) -> BTreeSet<Address> {
    rows.iter()
        .filter(|d| d.is_active_at(at))
        .map(|d| d.delegator.clone())
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegationSnapshot {
    pub account: Address,
    pub delegatee: Option<Address>,
    pub delegators: Vec<Address>,
    pub history: Vec<Delegation>,
}

pub struct DelegationRegistry {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    limiter: Arc<RateLimiter>,
}

impl DelegationRegistry {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            clock,
            limiter,
        }
    }

    pub async fn delegate(&self, delegator: &Address, delegatee: &Address) -> Result<Delegation> {
        self.limiter
            .check(RateLimitedAction::Delegate, delegator.as_str())?;
        self.delegate_admitted(delegator, delegatee).await
    }

    pub(crate) async fn delegate_admitted(
        &self,
        delegator: &Address,
        delegatee: &Address,
    ) -> Result<Delegation> {
        let delegation = Delegation {
            delegator: delegator.clone(),
            delegatee: delegatee.clone(),
            effective_from: self.clock.now(),
            revoked_at: None,
        };
        let previous = self.store.replace_delegation(delegation.clone()).await?;

        info!(
            delegator = %delegator,
            delegatee = %delegatee,
            previous = ?previous.as_ref().map(|d| d.delegatee.to_string()),
            self_delegation = delegation.is_self(),
            "delegation_changed"
        );
        Ok(delegation)
    }

    pub async fn delegatee_of(&self, account: &Address, at: Timestamp) -> Result<Option<Address>> {
        let history = self.store.delegation_history(account).await?;
        Ok(delegatee_at(&history, at).cloned())
    }

    pub async fn snapshot(&self, account: &Address, at: Timestamp) -> Result<DelegationSnapshot> {
        let history = self.store.delegation_history(account).await?;
        let incoming = self.store.delegations_to(account).await?;
        Ok(DelegationSnapshot {
            account: account.clone(),
            delegatee: delegatee_at(&history, at).cloned(),
            delegators: delegators_at(&incoming, at).into_iter().collect(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn row(from: u8, to: u8, start: Timestamp, end: Option<Timestamp>) -> Delegation {
        Delegation {
            delegator: addr(from),
            delegatee: addr(to),
            effective_from: start,
            revoked_at: end,
        }
    }

    #[test]
    fn test_history_answers_past_instants() {
        let history = vec![row(1, 2, 100, Some(200)), row(1, 3, 200, None)];
        assert_eq!(delegatee_at(&history, 50), None);
        assert_eq!(delegatee_at(&history, 100), Some(&addr(2)));
        assert_eq!(delegatee_at(&history, 199), Some(&addr(2)));
        assert_eq!(delegatee_at(&history, 200), Some(&addr(3)));
    }

    #[test]
    fn test_circular_delegation_is_one_hop() {
        // A -> B and B -> A: each only sees the other as a direct delegator
        let to_a = vec![row(2, 1, 10, None)];
        let to_b = vec![row(1, 2, 10, None)];
        assert_eq!(delegators_at(&to_a, 20), BTreeSet::from([addr(2)]));
        assert_eq!(delegators_at(&to_b, 20), BTreeSet::from([addr(1)]));
    }

    #[test]
    fn test_revoked_rows_drop_out() {
        let rows = vec![row(1, 9, 10, Some(50)), row(2, 9, 10, None), row(9, 9, 5, None)];
        let at_60 = delegators_at(&rows, 60);
        assert!(!at_60.contains(&addr(1)));
        assert!(at_60.contains(&addr(2)));
        assert!(at_60.contains(&addr(9)));
    }
}
