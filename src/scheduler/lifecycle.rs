use super::{Scheduler, TickReport};
use crate::clock::Clock;
use crate::metrics::METRICS;
use crate::store::MemoryStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Removes animals whose age has reached their lifespan. No payout.
pub struct LifecycleScheduler {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    seconds_per_sim_year: u32,
}

impl LifecycleScheduler {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, seconds_per_sim_year: u32) -> Self {
        Self {
            store,
            clock,
            seconds_per_sim_year: seconds_per_sim_year.max(1),
        }
    }
}

impl Scheduler for LifecycleScheduler {
    const NAME: &'static str = "lifecycle";

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// All deaths of a tick commit together; a conflict abandons the tick
    /// and the next one picks the same animals up again.
    fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let result = self.store.transaction(|tx| {
            let expired = tx.expired_animals(now);
            for animal in &expired {
                tx.delete_animal(animal.id);
            }
            Ok(expired)
        });

        let mut report = TickReport {
            now: Some(now),
            ..Default::default()
        };

        match result {
            Ok(expired) => {
                report.scanned = expired.len();
                report.applied = expired.len();
                for animal in &expired {
                    let age_seconds = animal.age_at(now).num_seconds();
                    info!(
                        animal_id = %animal.id,
                        farm_id = %animal.farm_id,
                        species = %animal.species,
                        name = %animal.name,
                        age_seconds,
                        age_years = age_seconds as f64 / f64::from(self.seconds_per_sim_year),
                        "animal died of old age"
                    );
                    METRICS.record_death(animal.species);
                }
            }
            Err(error) => {
                report.failed = 1;
                warn!(
                    kind = %error.kind,
                    error = %error.message,
                    "lifecycle tick abandoned, will retry next tick"
                );
            }
        }

        METRICS.set_live_animals(self.store.stats().animals);
        report
    }
}
