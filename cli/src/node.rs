//! Node assembly and run loop

use crate::config::{NodeConfig, StorageKind};
use api::ApiState;
use governance::scheduler::start_periodic_sweep;
use governance::{
    Clock, Ed25519Verifier, GovernanceEngine, GovernanceStore, MemoryStore, RequestContext,
    TokenLedger,
};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::SledStore;
use tokio::sync::watch;
use tracing::info;

pub struct Node {
    pub config: NodeConfig,
    pub engine: Arc<GovernanceEngine>,
    pub ledger: Arc<TokenLedger>,
    sled: Option<SledStore>,
}

impl Node {
    /// Open the store, register signer keys, mint allocations and wire the
    /// engine
    pub async fn build(config: NodeConfig, clock: Arc<dyn Clock>) -> Result<Self, Box<dyn Error>> {
        let (store, sled): (Arc<dyn GovernanceStore>, Option<SledStore>) = match config.storage {
            StorageKind::Memory => (Arc::new(MemoryStore::new()), None),
            StorageKind::Sled => {
                let dir = config.resolved_data_dir();
                std::fs::create_dir_all(&dir)?;
                let store = SledStore::open(dir.join("governance.db"))?;
                (Arc::new(store.clone()), Some(store))
            }
        };

        let verifier = Arc::new(Ed25519Verifier::new());
        for (address, key) in &config.signer_keys {
            verifier.register_hex(address.clone(), key).await?;
        }

        let ledger = Arc::new(TokenLedger::new(store.clone(), clock.clone()));
        for allocation in &config.allocations {
            ledger.mint(&allocation.address, allocation.amount.clone()).await;
        }

        let engine = Arc::new(GovernanceEngine::new(
            config.governance.clone(),
            store,
            ledger.clone(),
            verifier,
            clock,
        )?);

        // a durable store keeps self-delegations across restarts
        let system = RequestContext::system();
        for allocation in config.allocations.iter().filter(|a| a.self_delegate) {
            let current = engine.voting_power(&allocation.address).await?;
            if current.delegation.delegatee.as_ref() != Some(&allocation.address) {
                engine
                    .delegate(&system, &allocation.address, &allocation.address)
                    .await?;
            }
        }

        info!(
            node = %config.node_name,
            storage = ?config.storage,
            signers = config.signer_keys.len(),
            allocations = config.allocations.len(),
            "node_built"
        );

        Ok(Self {
            config,
            engine,
            ledger,
            sled,
        })
    }

    /// Serve the API and run the sweeper until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn Error>> {
        let period = Duration::from_secs(self.config.governance.sweep_interval_secs.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = start_periodic_sweep(self.engine.clone(), period, stop_rx);

        let state = ApiState::new(self.engine.clone(), self.config.node_name.clone());
        let served = api::start_server(self.config.listen_addr, state, shutdown).await;

        stop_tx.send_replace(true);
        sweeper.await?;
        self.flush()?;
        info!(node = %self.config.node_name, "node_stopped");
        served
    }

    pub fn flush(&self) -> Result<(), Box<dyn Error>> {
        if let Some(store) = &self.sled {
            let bytes = store.flush()?;
            info!(bytes, "store_flushed");
        }
        Ok(())
    }
}
