use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::ledger::{LedgerService, LedgerSettings};
use crate::pricing::PricingTable;
use crate::scheduler::{
    Heartbeat, LifecycleScheduler, ProductionScheduler, Scheduler, run_scheduler,
};
use crate::store::MemoryStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the service shares between the ledger, the schedulers and the
/// ops endpoints.
pub struct AppState {
    config: Arc<ServerConfig>,
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    prices: Arc<PricingTable>,
    ledger: Arc<LedgerService>,
    production: Arc<ProductionScheduler>,
    lifecycle: Arc<LifecycleScheduler>,
    production_heartbeat: Arc<Heartbeat>,
    lifecycle_heartbeat: Arc<Heartbeat>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds the state around an injected clock, e.g. a `ManualClock` in tests.
    pub fn with_clock(config: Arc<ServerConfig>, clock: Arc<dyn Clock>) -> Result<Self> {
        let settings =
            LedgerSettings::from_config(&config).context("invalid ledger settings in config")?;
        let store = Arc::new(MemoryStore::new());
        let prices = Arc::new(PricingTable::default());

        let ledger = Arc::new(LedgerService::new(store.clone(), clock.clone(), settings));
        let production = Arc::new(ProductionScheduler::new(
            store.clone(),
            prices.clone(),
            clock.clone(),
        ));
        let lifecycle = Arc::new(LifecycleScheduler::new(
            store.clone(),
            clock.clone(),
            config.seconds_per_sim_year,
        ));
        let production_heartbeat = Arc::new(Heartbeat::new(
            ProductionScheduler::NAME,
            config.production_interval(),
        ));
        let lifecycle_heartbeat = Arc::new(Heartbeat::new(
            LifecycleScheduler::NAME,
            config.lifecycle_interval(),
        ));

        Ok(Self {
            config,
            store,
            clock,
            prices,
            ledger,
            production,
            lifecycle,
            production_heartbeat,
            lifecycle_heartbeat,
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn prices(&self) -> &Arc<PricingTable> {
        &self.prices
    }

    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    pub fn production_scheduler(&self) -> &Arc<ProductionScheduler> {
        &self.production
    }

    pub fn lifecycle_scheduler(&self) -> &Arc<LifecycleScheduler> {
        &self.lifecycle
    }

    pub fn production_heartbeat(&self) -> &Arc<Heartbeat> {
        &self.production_heartbeat
    }

    pub fn lifecycle_heartbeat(&self) -> &Arc<Heartbeat> {
        &self.lifecycle_heartbeat
    }

    pub fn heartbeats(&self) -> [&Arc<Heartbeat>; 2] {
        [&self.production_heartbeat, &self.lifecycle_heartbeat]
    }

    /// Starts both scheduler loops on the current runtime. They run until
    /// `token` is cancelled.
    pub fn spawn_schedulers(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            production_interval_ms = self.config.production_interval_ms,
            lifecycle_interval_ms = self.config.lifecycle_interval_ms,
            "starting schedulers"
        );
        vec![
            tokio::spawn(run_scheduler(
                self.production.clone(),
                self.production_heartbeat.clone(),
                token.child_token(),
            )),
            tokio::spawn(run_scheduler(
                self.lifecycle.clone(),
                self.lifecycle_heartbeat.clone(),
                token.child_token(),
            )),
        ]
    }
}
