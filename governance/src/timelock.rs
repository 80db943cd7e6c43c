//! Delayed execution of succeeded proposals
//!
//! Settlement (execute, cancel, expire) is a single conditional transition
//! out of `Queued`; whichever caller commits first wins and every later
//! attempt fails with [`GovernanceError::OperationNotQueued`].

use crate::clock::{Clock, Timestamp};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::hash::FieldHasher;
use crate::proposal::{Proposal, ProposalId};
use crate::store::GovernanceStore;
use crate::types::{Action, Address, HashHex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const OPERATION_TAG: &str = "CIVIC_TIMELOCK_OP_V1";
pub const MAX_CANCEL_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Queued,
    /// Derived only: queued and past its ETA
    Ready,
    Executed,
    Cancelled,
    Expired,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 5] = [
        OperationStatus::Queued,
        OperationStatus::Ready,
        OperationStatus::Executed,
        OperationStatus::Cancelled,
        OperationStatus::Expired,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Executed | OperationStatus::Cancelled | OperationStatus::Expired
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockOperation {
    pub operation_hash: HashHex,
    pub proposal_id: ProposalId,
    pub actions: Vec<Action>,
    /// Description hash of the parent proposal
    pub salt: HashHex,
    pub predecessor: Option<HashHex>,
    /// Stored status; `Ready` and lazy expiry come from [`TimelockOperation::status_at`]
    pub status: OperationStatus,
    pub queued_at: Timestamp,
    pub min_delay: u64,
    pub eta: Timestamp,
    pub grace_period: u64,
    pub settled_at: Option<Timestamp>,
    pub executed_by: Option<Address>,
    pub cancelled_by: Option<Address>,
    pub cancel_reason: Option<String>,
}

/// How a queued operation leaves the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Execute { executor: Address },
    Cancel { actor: Address, reason: String },
    Expire,
}

impl Settlement {
    pub fn target_status(&self) -> OperationStatus {
        match self {
            Settlement::Execute { .. } => OperationStatus::Executed,
            Settlement::Cancel { .. } => OperationStatus::Cancelled,
            Settlement::Expire => OperationStatus::Expired,
        }
    }
}

impl TimelockOperation {
    pub fn expires_at(&self) -> Timestamp {
        self.eta.saturating_add(self.grace_period)
    }

    pub fn status_at(&self, now: Timestamp) -> OperationStatus {
        match self.status {
            OperationStatus::Queued | OperationStatus::Ready => {
                if now >= self.expires_at() {
                    OperationStatus::Expired
                } else if now >= self.eta {
                    OperationStatus::Ready
                } else {
                    OperationStatus::Queued
                }
            }
            terminal => terminal,
        }
    }

    pub fn seconds_until_ready(&self, now: Timestamp) -> u64 {
        self.eta.saturating_sub(now)
    }

    pub fn seconds_until_expiry(&self, now: Timestamp) -> u64 {
        self.expires_at().saturating_sub(now)
    }

    /// Apply a settlement. `predecessor_executed` is only consulted on execute.
    pub fn settle(
        &mut self,
        settlement: &Settlement,
        now: Timestamp,
        predecessor_executed: bool,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(GovernanceError::OperationNotQueued {
                hash: self.operation_hash.clone(),
                status: self.status.to_string(),
            });
        }
        match settlement {
            Settlement::Execute { executor } => {
                if now < self.eta {
                    return Err(GovernanceError::TimelockNotReady { eta: self.eta, now });
                }
                if now >= self.expires_at() {
                    return Err(GovernanceError::OperationExpired(self.operation_hash.clone()));
                }
                if !predecessor_executed {
                    return Err(GovernanceError::PredecessorNotExecuted(
                        self.predecessor.clone().unwrap_or_default(),
                    ));
                }
                self.executed_by = Some(executor.clone());
            }
            Settlement::Cancel { actor, reason } => {
                if now >= self.expires_at() {
                    return Err(GovernanceError::OperationExpired(self.operation_hash.clone()));
                }
                self.cancelled_by = Some(actor.clone());
                self.cancel_reason = Some(reason.clone());
            }
            Settlement::Expire => {
                if now < self.expires_at() {
                    return Err(GovernanceError::InvalidState {
                        expected: OperationStatus::Expired.to_string(),
                        actual: self.status_at(now).to_string(),
                    });
                }
            }
        }
        self.status = settlement.target_status();
        self.settled_at = Some(now);
        Ok(())
    }
}

/// Deterministic operation identity: the same proposal always maps to the
/// same hash
pub fn operation_hash(proposal_id: ProposalId, actions: &[Action], salt: &str) -> HashHex {
    let mut h = FieldHasher::new(OPERATION_TAG);
    h.u64(proposal_id).u64(actions.len() as u64);
    for action in actions {
        h.str(action.target.as_str())
            .uint(&action.value)
            .bytes(&action.payload);
    }
    h.str(salt);
    h.finish_hex()
}

/// Operation together with its derived status and countdowns
#[derive(Debug, Clone, Serialize)]
pub struct OperationView {
    #[serde(flatten)]
    pub operation: TimelockOperation,
    pub state: OperationStatus,
    pub seconds_until_ready: u64,
    pub seconds_until_expiry: u64,
}

impl OperationView {
    pub fn new(operation: TimelockOperation, now: Timestamp) -> Self {
        Self {
            state: operation.status_at(now),
            seconds_until_ready: operation.seconds_until_ready(now),
            seconds_until_expiry: operation.seconds_until_expiry(now),
            operation,
        }
    }
}

pub struct TimelockQueue {
    store: Arc<dyn GovernanceStore>,
    clock: Arc<dyn Clock>,
    config: Arc<GovernanceConfig>,
}

impl TimelockQueue {
    pub fn new(
        store: Arc<dyn GovernanceStore>,
        clock: Arc<dyn Clock>,
        config: Arc<GovernanceConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn min_delay(&self) -> u64 {
        self.config.timelock.min_delay_secs
    }

    pub async fn queue(
        &self,
        proposal_id: ProposalId,
        requested_delay: Option<u64>,
        predecessor: Option<HashHex>,
    ) -> Result<TimelockOperation> {
        let proposal = self.load_proposal(proposal_id).await?;
        let now = self.clock.now();

        let hash = operation_hash(proposal.id, &proposal.actions, &proposal.description_hash);
        if let Some(pred) = predecessor.as_deref() {
            if pred == hash {
                return Err(GovernanceError::InvalidInput(
                    "operation cannot be its own predecessor".to_string(),
                ));
            }
            if self.store.get_operation(pred).await?.is_none() {
                return Err(GovernanceError::OperationNotFound(pred.to_string()));
            }
        }

        let min_delay = self.min_delay();
        let max_delay = self.config.timelock.max_delay_secs;
        let delay = requested_delay.unwrap_or(min_delay).max(min_delay);
        if delay > max_delay {
            return Err(GovernanceError::InvalidInput(format!(
                "delay of {}s exceeds the maximum of {}s",
                delay, max_delay
            )));
        }
        let grace_period = self.config.timelock.grace_period_secs;
        let eta = now
            .checked_add(delay)
            .filter(|eta| eta.checked_add(grace_period).is_some())
            .ok_or_else(|| GovernanceError::InvalidInput("execution time overflows".to_string()))?;
        let operation = TimelockOperation {
            operation_hash: hash,
            proposal_id: proposal.id,
            actions: proposal.actions.clone(),
            salt: proposal.description_hash.clone(),
            predecessor,
            status: OperationStatus::Queued,
            queued_at: now,
            min_delay,
            eta,
            grace_period,
            settled_at: None,
            executed_by: None,
            cancelled_by: None,
            cancel_reason: None,
        };

        // the store re-checks Succeeded and hash uniqueness atomically
        self.store.queue_operation(operation.clone()).await?;

        info!(
            proposal_id,
            operation_hash = %operation.operation_hash,
            eta = operation.eta,
            expires_at = operation.expires_at(),
            predecessor = ?operation.predecessor,
            "operation_queued"
        );
        Ok(operation)
    }

    /// Permissionless: any caller may execute a ready operation
    pub async fn execute(&self, operation_hash: &str, executor: &Address) -> Result<TimelockOperation> {
        let settlement = Settlement::Execute {
            executor: executor.clone(),
        };
        let op = self
            .store
            .settle_operation(operation_hash, settlement, self.clock.now())
            .await
            .inspect_err(|e| debug!(operation_hash, error = %e, "operation_execute_rejected"))?;

        info!(
            operation_hash,
            proposal_id = op.proposal_id,
            executor = %executor,
            "operation_executed"
        );
        Ok(op)
    }

    pub async fn cancel(
        &self,
        operation_hash: &str,
        canceller: &Address,
        reason: &str,
    ) -> Result<TimelockOperation> {
        let reason = reason.trim();
        if reason.chars().count() > MAX_CANCEL_REASON_LEN {
            return Err(GovernanceError::InvalidInput(format!(
                "reason exceeds {} characters",
                MAX_CANCEL_REASON_LEN
            )));
        }
        let op = self
            .store
            .get_operation(operation_hash)
            .await?
            .ok_or_else(|| GovernanceError::OperationNotFound(operation_hash.to_string()))?;
        let proposal = self.load_proposal(op.proposal_id).await?;
        self.ensure_canceller(&proposal, canceller)?;

        let settlement = Settlement::Cancel {
            actor: canceller.clone(),
            reason: reason.to_string(),
        };
        let op = self
            .store
            .settle_operation(operation_hash, settlement, self.clock.now())
            .await?;

        info!(
            operation_hash,
            proposal_id = op.proposal_id,
            canceller = %canceller,
            reason,
            "operation_cancelled"
        );
        Ok(op)
    }

    pub fn ensure_canceller(&self, proposal: &Proposal, actor: &Address) -> Result<()> {
        if proposal.proposer == *actor || self.config.cancellers.contains(actor) {
            return Ok(());
        }
        warn!(proposal_id = proposal.id, actor = %actor, "unauthorized_cancel_attempt");
        Err(GovernanceError::Unauthorized(format!(
            "{} may not cancel proposal {}",
            actor, proposal.id
        )))
    }

    /// Expire every queued operation whose grace window has closed
    pub async fn expire_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = 0;
        for op in self.store.list_operations().await? {
            if op.status == OperationStatus::Queued && op.status_at(now) == OperationStatus::Expired {
                match self
                    .store
                    .settle_operation(&op.operation_hash, Settlement::Expire, now)
                    .await
                {
                    Ok(_) => {
                        expired += 1;
                        info!(operation_hash = %op.operation_hash, proposal_id = op.proposal_id, "operation_expired");
                    }
                    // lost a race with a concurrent settlement
                    Err(GovernanceError::OperationNotQueued { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(expired)
    }

    pub async fn get(&self, operation_hash: &str) -> Result<OperationView> {
        let op = self
            .store
            .get_operation(operation_hash)
            .await?
            .ok_or_else(|| GovernanceError::OperationNotFound(operation_hash.to_string()))?;
        Ok(OperationView::new(op, self.clock.now()))
    }

    /// Queue listing, optionally narrowed to one derived status, soonest ETA first
    pub async fn list(&self, status: Option<OperationStatus>) -> Result<Vec<OperationView>> {
        let now = self.clock.now();
        let mut views: Vec<OperationView> = self
            .store
            .list_operations()
            .await?
            .into_iter()
            .map(|op| OperationView::new(op, now))
            .filter(|v| status.map_or(true, |s| s == v.state))
            .collect();
        views.sort_by_key(|v| (v.operation.eta, v.operation.proposal_id));
        Ok(views)
    }

    async fn load_proposal(&self, proposal_id: ProposalId) -> Result<Proposal> {
        self.store
            .get_proposal(proposal_id)
            .await?
            .ok_or(GovernanceError::ProposalNotFound(proposal_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Power;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    fn op(eta: Timestamp) -> TimelockOperation {
        let actions = vec![Action {
            target: addr(5),
            value: Power::from(1u32),
            payload: vec![],
        }];
        TimelockOperation {
            operation_hash: operation_hash(1, &actions, "salt"),
            proposal_id: 1,
            actions,
            salt: "salt".to_string(),
            predecessor: None,
            status: OperationStatus::Queued,
            queued_at: 0,
            min_delay: eta,
            eta,
            grace_period: 100,
            settled_at: None,
            executed_by: None,
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = op(10);
        assert_eq!(a.operation_hash, operation_hash(1, &a.actions, "salt"));
        assert_ne!(a.operation_hash, operation_hash(2, &a.actions, "salt"));
        assert_ne!(a.operation_hash, operation_hash(1, &a.actions, "pepper"));
    }

    #[test]
    fn test_derived_status() {
        let o = op(1_000);
        assert_eq!(o.status_at(999), OperationStatus::Queued);
        assert_eq!(o.status_at(1_000), OperationStatus::Ready);
        assert_eq!(o.status_at(1_099), OperationStatus::Ready);
        assert_eq!(o.status_at(1_100), OperationStatus::Expired);
        assert_eq!(o.seconds_until_ready(400), 600);
    }

    #[test]
    fn test_execute_window() {
        let exec = Settlement::Execute { executor: addr(9) };

        let mut early = op(1_000);
        assert_eq!(
            early.settle(&exec, 999, true),
            Err(GovernanceError::TimelockNotReady { eta: 1_000, now: 999 })
        );
        assert_eq!(early.status, OperationStatus::Queued);

        let mut late = op(1_000);
        assert!(matches!(
            late.settle(&exec, 1_100, true),
            Err(GovernanceError::OperationExpired(_))
        ));

        let mut ok = op(1_000);
        ok.settle(&exec, 1_000, true).unwrap();
        assert_eq!(ok.status, OperationStatus::Executed);
        assert!(matches!(
            ok.settle(&exec, 1_001, true),
            Err(GovernanceError::OperationNotQueued { .. })
        ));
    }

    #[test]
    fn test_cancel_and_execute_are_exclusive() {
        let mut o = op(1_000);
        o.settle(
            &Settlement::Cancel {
                actor: addr(1),
                reason: "bug".to_string(),
            },
            500,
            true,
        )
        .unwrap();
        assert_eq!(o.status, OperationStatus::Cancelled);
        assert!(o
            .settle(&Settlement::Execute { executor: addr(2) }, 1_000, true)
            .is_err());
    }

    #[test]
    fn test_predecessor_gate() {
        let mut o = op(1_000);
        o.predecessor = Some("abc".to_string());
        assert_eq!(
            o.settle(&Settlement::Execute { executor: addr(2) }, 1_000, false),
            Err(GovernanceError::PredecessorNotExecuted("abc".to_string()))
        );
    }

    #[test]
    fn test_expire_only_after_grace() {
        let mut o = op(1_000);
        assert!(o.settle(&Settlement::Expire, 1_050, true).is_err());
        o.settle(&Settlement::Expire, 1_100, true).unwrap();
        assert_eq!(o.status_at(2_000), OperationStatus::Expired);
    }
}
