#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use farm_ledger::domain::Species;
use farm_ledger::model::{Animal, BuyAnimalRequest, Farm, User};
use farm_ledger::scheduler::{Scheduler, TickReport};
use farm_ledger::store::MemoryStore;
use farm_ledger::{AppState, Clock, LedgerService, ManualClock, ServerConfig};

pub fn epoch() -> DateTime<Utc> {
    "2024-03-01T06:00:00Z".parse().expect("valid timestamp")
}

/// A complete service wired to a manual clock. Ticks are driven by hand.
pub struct Farmyard {
    pub clock: Arc<ManualClock>,
    pub state: Arc<AppState>,
}

impl Farmyard {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        let state = AppState::with_clock(Arc::new(config), clock.clone()).expect("app state");
        Self {
            clock,
            state: Arc::new(state),
        }
    }

    /// One simulated year per wall-clock second, so lifespans are short.
    pub fn fast_years() -> Self {
        Self::with_config(ServerConfig {
            seconds_per_sim_year: 1,
            ..ServerConfig::default()
        })
    }

    pub fn ledger(&self) -> &LedgerService {
        self.state.ledger()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.state.store()
    }

    pub fn advance(&self, secs: i64) -> DateTime<Utc> {
        self.clock.advance_secs(secs)
    }

    pub fn production_tick(&self) -> TickReport {
        let now = self.clock.now();
        self.state.production_scheduler().run_tick(now)
    }

    pub fn lifecycle_tick(&self) -> TickReport {
        let now = self.clock.now();
        self.state.lifecycle_scheduler().run_tick(now)
    }

    /// Registers a user and returns it with its default farm.
    pub async fn register(&self, username: &str) -> (User, Farm) {
        let user = self
            .ledger()
            .register_user(username, &format!("{username}@example.com"))
            .await
            .expect("register user");
        let farm = self
            .ledger()
            .list_farms(user.id)
            .expect("list farms")
            .into_iter()
            .next()
            .expect("default farm");
        (user, farm)
    }

    pub async fn buy(&self, user: &User, farm: &Farm, species: Species) -> Animal {
        self.ledger()
            .buy_animal(farm.id, user.id, BuyAnimalRequest::new(species, "Bessie"))
            .await
            .expect("buy animal")
    }

    pub fn balance(&self, user: &User) -> rust_decimal::Decimal {
        self.ledger().get_balance(user.id).expect("balance")
    }
}
