//! Voting power oracle boundary
//!
//! Balances and delegated power live outside the engine. Every call goes
//! through [`bounded`] so an unresponsive oracle turns into
//! `OracleUnavailable` instead of a hung request, and never into zero power.

use crate::clock::Timestamp;
use crate::error::{GovernanceError, Result};
use crate::types::{Address, Power};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

impl From<OracleError> for GovernanceError {
    fn from(e: OracleError) -> Self {
        GovernanceError::OracleUnavailable(e.to_string())
    }
}

#[async_trait]
pub trait VotingPowerOracle: Send + Sync {
    /// Effective power (own if self-delegated, plus delegated-in) at `snapshot`
    async fn power_at(
        &self,
        account: &Address,
        snapshot: Timestamp,
    ) -> std::result::Result<Power, OracleError>;

    /// Current token balance
    async fn balance_of(&self, account: &Address) -> std::result::Result<Power, OracleError>;

    /// Total token supply at `snapshot`, used for the quorum bar
    async fn total_supply_at(&self, snapshot: Timestamp)
        -> std::result::Result<Power, OracleError>;
}

/// Run an oracle call under a deadline
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, OracleError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(OracleError::Timeout(timeout).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, OracleError>(Power::from(1u32))
        };
        let result = bounded(Duration::from_millis(100), slow).await;
        assert!(matches!(result, Err(GovernanceError::OracleUnavailable(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_through_errors() {
        let failing = async { Err::<Power, _>(OracleError::Unavailable("node down".to_string())) };
        let result = bounded(Duration::from_secs(1), failing).await;
        assert_eq!(
            result,
            Err(GovernanceError::OracleUnavailable(
                "oracle unavailable: node down".to_string()
            ))
        );
    }
}
