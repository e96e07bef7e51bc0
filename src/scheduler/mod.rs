//! Background simulation workers.
//!
//! Each scheduler exposes a synchronous `run_tick(now)` that does one pass
//! over committed state, and shares the [`run_scheduler`] loop that drives it
//! on a fixed interval until cancelled. Cancellation is only observed between
//! ticks, so a tick in progress always finishes its commits.

pub mod lifecycle;
pub mod production;

pub use lifecycle::LifecycleScheduler;
pub use production::ProductionScheduler;

use crate::clock::Clock;
use crate::logging::tick_span;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: u64,
    pub now: Option<DateTime<Utc>>,
    /// Rows that matched the scan
    pub scanned: usize,
    /// Rows the tick changed (units produced, animals removed)
    pub applied: usize,
    /// Rows that no longer qualified by the time their transaction ran
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn outcome(&self) -> &'static str {
        match (self.failed, self.applied) {
            (0, _) => "ok",
            (_, 0) if self.skipped == 0 => "failed",
            _ => "partial",
        }
    }
}

/// A periodic worker driven by [`run_scheduler`].
pub trait Scheduler: Send + Sync + 'static {
    const NAME: &'static str;

    fn clock(&self) -> &dyn Clock;

    fn run_tick(&self, now: DateTime<Utc>) -> TickReport;
}

/// Liveness record of a scheduler loop, read by the health checker.
#[derive(Debug)]
pub struct Heartbeat {
    name: &'static str,
    interval: Duration,
    started: Instant,
    last_tick: Mutex<Option<Instant>>,
    last_report: Mutex<Option<TickReport>>,
    ticks: AtomicU64,
    stopped: Mutex<bool>,
}

impl Heartbeat {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            started: Instant::now(),
            last_tick: Mutex::new(None),
            last_report: Mutex::new(None),
            ticks: AtomicU64::new(0),
            stopped: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn next_tick_number(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record(&self, report: TickReport) {
        *self.last_tick.lock() = Some(Instant::now());
        *self.last_report.lock() = Some(report);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report.lock().clone()
    }

    /// Time since the last completed tick, or since start if none has run.
    pub fn since_last_tick(&self) -> Duration {
        self.last_tick
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// True once the loop has missed three intervals in a row.
    pub fn is_stale(&self) -> bool {
        self.since_last_tick() > self.interval * 3
    }

    pub fn mark_stopped(&self) {
        *self.stopped.lock() = true;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

/// Drives `scheduler` every `heartbeat.interval()` until `token` is cancelled.
pub async fn run_scheduler<S: Scheduler>(
    scheduler: Arc<S>,
    heartbeat: Arc<Heartbeat>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(heartbeat.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        scheduler = S::NAME,
        interval_ms = heartbeat.interval().as_millis() as u64,
        "scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let tick = heartbeat.next_tick_number();
        let span = tick_span(S::NAME, tick);
        let _entered = span.enter();

        let started = Instant::now();
        let now = scheduler.clock().now();
        let mut report = scheduler.run_tick(now);
        report.tick = tick;
        let elapsed = started.elapsed();

        METRICS.record_tick(S::NAME, report.outcome(), elapsed);
        crate::log_slow_operation!(
            elapsed,
            heartbeat.interval().as_millis() as u64,
            scheduler = S::NAME,
            tick,
            scanned = report.scanned,
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed,
            "scheduler tick finished"
        );
        heartbeat.record(report);
    }

    heartbeat.mark_stopped();
    tracing::info!(
        scheduler = S::NAME,
        ticks = heartbeat.ticks(),
        "scheduler stopped"
    );
}
