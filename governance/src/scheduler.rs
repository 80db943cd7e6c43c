//! Periodic sweep task

use crate::engine::GovernanceEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Call [`GovernanceEngine::sweep_expired`] every `period` until `shutdown`
/// flips to true or its sender is dropped
pub fn start_periodic_sweep(
    engine: Arc<GovernanceEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "sweeper_started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = engine.sweep_expired().await {
                        error!(error = %e, "sweep_failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("sweeper_stopped");
    })
}
