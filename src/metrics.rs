/// Prometheus metrics for the ledger, the store and both schedulers
///
/// Counters are registered without the `_total` suffix; the text encoder
/// appends it.
use crate::domain::{ProductKind, Species};
use crate::error::ErrorKind;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for ledger operation outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Operation name (e.g., "buy_animal", "sell_all_products")
    pub operation: String,
    /// "success" or "error"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationNameLabels {
    pub operation: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub operation: String,
    /// Error kind category (e.g., "contention", "business_rule")
    pub category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TableLabels {
    pub table: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProductLabels {
    pub product_kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SpeciesLabels {
    pub species: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TickLabels {
    /// "production" or "lifecycle"
    pub scheduler: String,
    /// "ok", "partial" or "failed"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SchedulerLabels {
    pub scheduler: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    // Ledger
    pub ledger_operations: Family<OperationLabels, Counter>,
    pub ledger_operation_duration_seconds: Family<OperationNameLabels, Histogram>,
    pub ledger_active_operations: Family<OperationNameLabels, Gauge>,
    pub ledger_retries: Family<OperationNameLabels, Counter>,
    pub ledger_errors: Family<ErrorLabels, Counter>,

    // Store
    pub store_conflicts: Family<TableLabels, Counter>,

    // Simulation
    pub production_units: Family<ProductLabels, Counter>,
    pub animal_deaths: Family<SpeciesLabels, Counter>,
    pub live_animals: Gauge,

    // Schedulers
    pub scheduler_ticks: Family<TickLabels, Counter>,
    pub scheduler_tick_duration_seconds: Family<SchedulerLabels, Histogram>,
}

impl MetricsCollector {
    /// Create a new metrics collector with all metrics registered
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("farm_ledger");

        let ledger_operations = Family::<OperationLabels, Counter>::default();
        registry.register(
            "operations",
            "Ledger operations by name and status",
            ledger_operations.clone(),
        );

        let ledger_operation_duration_seconds =
            Family::<OperationNameLabels, Histogram>::new_with_constructor(|| {
                // 100us .. ~2.6s
                Histogram::new(exponential_buckets(0.0001, 3.0, 10))
            });
        registry.register(
            "operation_duration_seconds",
            "Ledger operation latency in seconds, retries included",
            ledger_operation_duration_seconds.clone(),
        );

        let ledger_active_operations = Family::<OperationNameLabels, Gauge>::default();
        registry.register(
            "active_operations",
            "Ledger operations currently executing",
            ledger_active_operations.clone(),
        );

        let ledger_retries = Family::<OperationNameLabels, Counter>::default();
        registry.register(
            "operation_retries",
            "Ledger transaction attempts repeated after a conflict",
            ledger_retries.clone(),
        );

        let ledger_errors = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "errors",
            "Ledger errors by operation and category",
            ledger_errors.clone(),
        );

        let store_conflicts = Family::<TableLabels, Counter>::default();
        registry.register(
            "store_conflicts",
            "Transactions aborted at commit because a read went stale",
            store_conflicts.clone(),
        );

        let production_units = Family::<ProductLabels, Counter>::default();
        registry.register(
            "production_units",
            "Product units credited by the production scheduler",
            production_units.clone(),
        );

        let animal_deaths = Family::<SpeciesLabels, Counter>::default();
        registry.register(
            "animal_deaths",
            "Animals removed by the lifecycle scheduler",
            animal_deaths.clone(),
        );

        let live_animals = Gauge::default();
        registry.register(
            "live_animals",
            "Animals currently alive across all farms",
            live_animals.clone(),
        );

        let scheduler_ticks = Family::<TickLabels, Counter>::default();
        registry.register(
            "scheduler_ticks",
            "Scheduler ticks by scheduler and outcome",
            scheduler_ticks.clone(),
        );

        let scheduler_tick_duration_seconds =
            Family::<SchedulerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0005, 2.5, 10))
            });
        registry.register(
            "scheduler_tick_duration_seconds",
            "Scheduler tick duration in seconds",
            scheduler_tick_duration_seconds.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            ledger_operations,
            ledger_operation_duration_seconds,
            ledger_active_operations,
            ledger_retries,
            ledger_errors,
            store_conflicts,
            production_units,
            animal_deaths,
            live_animals,
            scheduler_ticks,
            scheduler_tick_duration_seconds,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(error = %error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_operation_success(&self, operation: &str, duration: Duration) {
        self.record_operation(operation, "success", duration);
    }

    pub fn record_operation_error(&self, operation: &str, duration: Duration, kind: ErrorKind) {
        self.record_operation(operation, "error", duration);
        self.ledger_errors
            .get_or_create(&ErrorLabels {
                operation: operation.to_string(),
                category: kind.category().to_string(),
            })
            .inc();
    }

    fn record_operation(&self, operation: &str, status: &str, duration: Duration) {
        self.ledger_operations
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.ledger_operation_duration_seconds
            .get_or_create(&OperationNameLabels {
                operation: operation.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry(&self, operation: &str) {
        self.ledger_retries
            .get_or_create(&OperationNameLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn record_store_conflict(&self, table: &str) {
        self.store_conflicts
            .get_or_create(&TableLabels {
                table: table.to_string(),
            })
            .inc();
    }

    pub fn record_production(&self, kind: ProductKind) {
        self.production_units
            .get_or_create(&ProductLabels {
                product_kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_death(&self, species: Species) {
        self.animal_deaths
            .get_or_create(&SpeciesLabels {
                species: species.to_string(),
            })
            .inc();
    }

    pub fn set_live_animals(&self, count: usize) {
        self.live_animals.set(count as i64);
    }

    pub fn record_tick(&self, scheduler: &str, outcome: &str, duration: Duration) {
        self.scheduler_ticks
            .get_or_create(&TickLabels {
                scheduler: scheduler.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        self.scheduler_tick_duration_seconds
            .get_or_create(&SchedulerLabels {
                scheduler: scheduler.to_string(),
            })
            .observe(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for ledger operation timing
///
/// An operation dropped without being marked counts as an error of kind
/// `Fatal`, which only happens if the future was cancelled mid-flight.
pub struct OperationMetrics {
    operation: &'static str,
    start: Instant,
    completed: bool,
}

impl OperationMetrics {
    pub fn new(operation: &'static str) -> Self {
        METRICS
            .ledger_active_operations
            .get_or_create(&OperationNameLabels {
                operation: operation.to_string(),
            })
            .inc();

        Self {
            operation,
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn success(mut self) {
        METRICS.record_operation_success(self.operation, self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, kind: ErrorKind) {
        METRICS.record_operation_error(self.operation, self.start.elapsed(), kind);
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        METRICS
            .ledger_active_operations
            .get_or_create(&OperationNameLabels {
                operation: self.operation.to_string(),
            })
            .dec();
    }
}

impl Drop for OperationMetrics {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_operation_error(self.operation, self.start.elapsed(), ErrorKind::Fatal);
            self.finish();
        }
    }
}
