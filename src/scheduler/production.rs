use super::{Scheduler, TickReport};
use crate::clock::Clock;
use crate::domain::{AnimalId, ProductId, ProductKind};
use crate::error::{LedgerError, LedgerResult};
use crate::metrics::METRICS;
use crate::model::Product;
use crate::pricing::PriceSource;
use crate::recovery::process_batch;
use crate::store::MemoryStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Production {
    Produced(ProductKind),
    /// Sold, dead or already re-armed by the time its transaction ran
    Skipped,
}

/// Credits one unit of product per ready animal per tick.
pub struct ProductionScheduler {
    store: Arc<MemoryStore>,
    prices: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
}

impl ProductionScheduler {
    pub fn new(store: Arc<MemoryStore>, prices: Arc<dyn PriceSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            prices,
            clock,
        }
    }

    /// One animal, one transaction: bump (or create) the stock row and re-arm.
    fn produce(&self, animal_id: AnimalId, now: DateTime<Utc>) -> LedgerResult<Production> {
        self.store.transaction(|tx| {
            let mut animal = match tx.animal(animal_id) {
                Some(animal) if animal.is_ready_at(now) => animal,
                _ => return Ok(Production::Skipped),
            };
            if tx.farm(animal.farm_id).is_none() {
                return Err(LedgerError::fatal()
                    .message("ready animal references a farm that does not exist")
                    .farm(animal.farm_id)
                    .entity(animal_id)
                    .build());
            }

            let kind = animal.species.product();
            let unit_sale_price = self.prices.price(kind);

            let product = match tx.product_for(animal.farm_id, kind) {
                Some(mut product) => {
                    product.quantity = product.quantity.saturating_add(1);
                    product.unit_sale_price = unit_sale_price;
                    product.produced_at = now;
                    product
                }
                None => Product {
                    id: ProductId::new(),
                    farm_id: animal.farm_id,
                    product_kind: kind,
                    quantity: 1,
                    unit_sale_price,
                    produced_at: now,
                },
            };
            tx.put_product(product);

            // relative to now, so a late tick still yields exactly one unit
            animal.next_production_time = Some(now + animal.production_interval());
            tx.put_animal(animal);

            Ok(Production::Produced(kind))
        })
    }
}

impl Scheduler for ProductionScheduler {
    const NAME: &'static str = "production";

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let ready = self.store.snapshot().animals_ready_at(now);

        let batch = process_batch(
            ready,
            |animal| animal.id.to_string(),
            |_, animal| self.produce(animal.id, now),
        );

        let mut report = TickReport {
            now: Some(now),
            scanned: batch.total,
            failed: batch.failure_count(),
            ..Default::default()
        };
        for outcome in &batch.succeeded {
            match outcome {
                Production::Produced(kind) => {
                    report.applied += 1;
                    METRICS.record_production(*kind);
                }
                Production::Skipped => report.skipped += 1,
            }
        }

        for failure in &batch.failed {
            warn!(
                animal_id = %failure.item_id,
                kind = %failure.kind,
                error = %failure.error,
                "production skipped for animal"
            );
        }
        if batch.has_fatal_errors() {
            error!(
                fatal = batch.failed.iter().filter(|f| f.is_fatal()).count(),
                "production tick hit integrity violations"
            );
        }
        if report.scanned > 0 {
            debug!(
                produced = report.applied,
                skipped = report.skipped,
                failed = report.failed,
                "production tick applied"
            );
        }

        report
    }
}
