//! Checkpointed in-memory token ledger
//!
//! Development stand-in for the external voting power oracle. Balances and
//! supply are checkpointed by timestamp; voting power follows the stored
//! delegation history one hop deep.

use crate::clock::{Clock, Timestamp};
use crate::delegation::delegators_at;
use crate::error::{GovernanceError, Result};
use crate::oracle::{OracleError, VotingPowerOracle};
use crate::store::GovernanceStore;
use crate::types::{Address, Power};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

type Checkpoints = Vec<(Timestamp, Power)>;

fn value_at(checkpoints: &Checkpoints, at: Timestamp) -> Power {
    let idx = checkpoints.partition_point(|(ts, _)| *ts <= at);
    if idx == 0 {
        Power::from(0u32)
    } else {
        checkpoints[idx - 1].1.clone()
    }
}

fn write_checkpoint(checkpoints: &mut Checkpoints, at: Timestamp, value: Power) {
    match checkpoints.last_mut() {
        Some((ts, last)) if *ts == at => *last = value,
        _ => checkpoints.push((at, value)),
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, Checkpoints>,
    supply: Checkpoints,
}

impl LedgerState {
    fn balance_now(&self, account: &Address) -> Power {
        self.balances
            .get(account)
            .and_then(|c| c.last())
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn set_balance(&mut self, account: &Address, at: Timestamp, value: Power) {
        write_checkpoint(self.balances.entry(account.clone()).or_default(), at, value);
    }

    fn adjust_supply(&mut self, at: Timestamp, value: Power) {
        write_checkpoint(&mut self.supply, at, value);
    }
}

pub struct TokenLedger {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
    available: AtomicBool,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn GovernanceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            state: RwLock::new(LedgerState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an oracle outage
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn mint(&self, to: &Address, amount: Power) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let balance = state.balance_now(to) + &amount;
        state.set_balance(to, now, balance);
        let supply = value_at(&state.supply, now) + &amount;
        state.adjust_supply(now, supply);
        info!(to = %to, amount = %amount, "tokens_minted");
    }

    pub async fn burn(&self, from: &Address, amount: Power) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let balance = state.balance_now(from);
        if balance < amount {
            return Err(insufficient(&balance, &amount));
        }
        state.set_balance(from, now, balance - &amount);
        let supply = value_at(&state.supply, now) - &amount;
        state.adjust_supply(now, supply);
        info!(from = %from, amount = %amount, "tokens_burned");
        Ok(())
    }

    pub async fn transfer(&self, from: &Address, to: &Address, amount: Power) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let from_balance = state.balance_now(from);
        if from_balance < amount {
            return Err(insufficient(&from_balance, &amount));
        }
        state.set_balance(from, now, from_balance - &amount);
        let to_balance = state.balance_now(to) + &amount;
        state.set_balance(to, now, to_balance);
        info!(from = %from, to = %to, amount = %amount, "tokens_transferred");
        Ok(())
    }

    pub async fn balance_at(&self, account: &Address, at: Timestamp) -> Power {
        let state = self.state.read().await;
        state
            .balances
            .get(account)
            .map(|c| value_at(c, at))
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> std::result::Result<(), OracleError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OracleError::Unavailable("ledger offline".to_string()))
        }
    }
}

fn insufficient(balance: &Power, amount: &Power) -> GovernanceError {
    GovernanceError::InsufficientVotingPower {
        required: amount.to_string(),
        available: balance.to_string(),
    }
}

#[async_trait]
impl VotingPowerOracle for TokenLedger {
    async fn power_at(
        &self,
        account: &Address,
        snapshot: Timestamp,
    ) -> std::result::Result<Power, OracleError> {
        self.ensure_available()?;
        let rows = self
            .store
            .delegations_to(account)
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let state = self.state.read().await;
        let power = delegators_at(&rows, snapshot)
            .iter()
            .filter_map(|d| state.balances.get(d))
            .map(|c| value_at(c, snapshot))
            .sum();
        Ok(power)
    }

    async fn balance_of(&self, account: &Address) -> std::result::Result<Power, OracleError> {
        self.ensure_available()?;
        Ok(self.state.read().await.balance_now(account))
    }

    async fn total_supply_at(&self, snapshot: Timestamp) -> std::result::Result<Power, OracleError> {
        self.ensure_available()?;
        Ok(value_at(&self.state.read().await.supply, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delegation::Delegation;
    use crate::memory::MemoryStore;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn p(n: u64) -> Power {
        Power::from(n)
    }

    async fn delegate(store: &MemoryStore, from: u8, to: u8, at: Timestamp) {
        store
            .replace_delegation(Delegation {
                delegator: addr(from),
                delegatee: addr(to),
                effective_from: at,
                revoked_at: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoints_answer_history() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(100));
        let ledger = TokenLedger::new(store, clock.clone());

        ledger.mint(&addr(1), p(1_000)).await;
        clock.set(200);
        ledger.transfer(&addr(1), &addr(2), p(400)).await.unwrap();
        clock.set(300);
        ledger.burn(&addr(2), p(100)).await.unwrap();

        assert_eq!(ledger.balance_at(&addr(1), 150).await, p(1_000));
        assert_eq!(ledger.balance_at(&addr(1), 250).await, p(600));
        assert_eq!(ledger.balance_at(&addr(2), 99).await, p(0));
        assert_eq!(ledger.total_supply_at(250).await.unwrap(), p(1_000));
        assert_eq!(ledger.total_supply_at(300).await.unwrap(), p(900));
        assert!(ledger.burn(&addr(2), p(10_000)).await.is_err());
    }

    #[tokio::test]
    async fn test_power_requires_delegation() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(100));
        let ledger = TokenLedger::new(store.clone(), clock.clone());

        ledger.mint(&addr(1), p(500)).await;
        ledger.mint(&addr(2), p(300)).await;
        assert_eq!(ledger.power_at(&addr(1), 100).await.unwrap(), p(0));

        delegate(&store, 1, 1, 110).await;
        delegate(&store, 2, 1, 120).await;
        assert_eq!(ledger.power_at(&addr(1), 115).await.unwrap(), p(500));
        assert_eq!(ledger.power_at(&addr(1), 120).await.unwrap(), p(800));
        assert_eq!(ledger.power_at(&addr(2), 120).await.unwrap(), p(0));
    }

    #[tokio::test]
    async fn test_circular_delegation_resolves() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(100));
        let ledger = TokenLedger::new(store.clone(), clock);

        ledger.mint(&addr(1), p(50)).await;
        ledger.mint(&addr(2), p(70)).await;
        delegate(&store, 1, 2, 100).await;
        delegate(&store, 2, 1, 100).await;

        assert_eq!(ledger.power_at(&addr(1), 100).await.unwrap(), p(70));
        assert_eq!(ledger.power_at(&addr(2), 100).await.unwrap(), p(50));
    }

    #[tokio::test]
    async fn test_outage_is_an_error_not_zero() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(100));
        let ledger = TokenLedger::new(store, clock);

        ledger.set_available(false);
        assert!(matches!(
            ledger.power_at(&addr(1), 100).await,
            Err(OracleError::Unavailable(_))
        ));
    }
}
