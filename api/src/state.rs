//! API State Management

use governance::GovernanceEngine;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<GovernanceEngine>,
    pub start_time: Instant,
    pub node_name: String,
}

impl ApiState {
    pub fn new(engine: Arc<GovernanceEngine>, node_name: impl Into<String>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
            node_name: node_name.into(),
        }
    }
}
