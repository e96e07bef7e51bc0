//! Graceful shutdown coordination
//!
//! Shutdown runs in phases, each bounded by its own timeout and the whole
//! sequence bounded by `total_timeout`:
//!
//! 1. **Stop Accepting** - cancel the shared token; schedulers exit after
//!    the tick they are on and the ops server stops taking connections
//! 2. **Draining** - wait for scheduler tasks to finish their last tick
//! 3. **Flushing** - log final store counters
//!
//! # Example
//!
//! ```rust,no_run
//! use farm_ledger::shutdown::{CompositeShutdownHandler, ShutdownConfig, ShutdownCoordinator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
//! let token = coordinator.token();
//!
//! tokio::spawn(async move {
//!     token.cancelled().await;
//! });
//!
//! coordinator.wait_for_signal().await;
//! coordinator.shutdown(&CompositeShutdownHandler::new()).await?;
//! # Ok(())
//! # }
//! ```

use crate::scheduler::Heartbeat;
use crate::store::MemoryStore;
use anyhow::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Phase 2: wait for background tasks to finish
    pub drain_timeout: Duration,

    /// Phase 3: flush and final logging
    pub flush_timeout: Duration,

    /// Total maximum shutdown time before force termination
    pub total_timeout: Duration,

    /// Whether to enable force shutdown after timeout
    pub force_shutdown_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(20),
            flush_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(30),
            force_shutdown_on_timeout: true,
        }
    }
}

impl ShutdownConfig {
    /// Create a shutdown config with custom total timeout
    pub fn with_total_timeout(mut self, timeout_secs: u64) -> Self {
        self.total_timeout = Duration::from_secs(timeout_secs);
        self
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Server is running normally
    Running,
    /// Phase 1: token cancelled, no new work starts
    StopAccepting,
    /// Phase 2: waiting for background tasks
    Draining,
    /// Phase 3: flushing state and final logging
    Flushing,
    /// Shutdown complete
    Complete,
    /// Force shutdown due to timeout
    Forced,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StopAccepting => write!(f, "stop_accepting"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::Flushing => write!(f, "flushing"),
            ShutdownPhase::Complete => write!(f, "complete"),
            ShutdownPhase::Forced => write!(f, "forced"),
        }
    }
}

/// Coordinates graceful shutdown across all server components
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    shutdown_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token cancelled in phase 1. Clone it into every background task.
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT)
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            },
            _ = self.shutdown_token.cancelled() => {
                info!("shutdown requested programmatically");
            },
        }
    }

    /// Execute graceful shutdown with all phases
    pub async fn shutdown(&self, handler: &dyn ShutdownHandler) -> Result<()> {
        info!("starting graceful shutdown sequence");

        let shutdown_result = if self.config.total_timeout > Duration::ZERO {
            timeout(self.config.total_timeout, self.run_shutdown_phases(handler))
                .await
                .unwrap_or_else(|_| {
                    error!(
                        timeout_secs = self.config.total_timeout.as_secs(),
                        "graceful shutdown exceeded total timeout"
                    );
                    Err(anyhow::anyhow!("shutdown timeout exceeded"))
                })
        } else {
            self.run_shutdown_phases(handler).await
        };

        match shutdown_result {
            Ok(_) => {
                info!("graceful shutdown completed successfully");
                *self.phase.write().await = ShutdownPhase::Complete;
                Ok(())
            }
            Err(e) if self.config.force_shutdown_on_timeout => {
                warn!("graceful shutdown failed, forcing shutdown: {}", e);
                *self.phase.write().await = ShutdownPhase::Forced;
                Ok(())
            }
            Err(e) => {
                error!("graceful shutdown failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_shutdown_phases(&self, handler: &dyn ShutdownHandler) -> Result<()> {
        *self.phase.write().await = ShutdownPhase::StopAccepting;
        info!("shutdown phase 1: stopping new work");
        self.shutdown_token.cancel();

        *self.phase.write().await = ShutdownPhase::Draining;
        info!("shutdown phase 2: draining background tasks");
        match timeout(self.config.drain_timeout, handler.shutdown()).await {
            Ok(Err(e)) => warn!("drain error: {}", e),
            Err(_) => warn!(
                timeout_secs = self.config.drain_timeout.as_secs(),
                "drain timeout reached"
            ),
            Ok(Ok(())) => debug!("phase 2 complete: background tasks drained"),
        }

        *self.phase.write().await = ShutdownPhase::Flushing;
        info!("shutdown phase 3: flushing");
        match timeout(self.config.flush_timeout, handler.flush()).await {
            Ok(Err(e)) => warn!("flush error: {}", e),
            Err(_) => warn!("flush timeout reached"),
            Ok(Ok(())) => debug!("phase 3 complete: flushed"),
        }

        Ok(())
    }
}

/// Trait for components that need graceful shutdown
#[async_trait::async_trait]
pub trait ShutdownHandler: Send + Sync {
    /// Stop the component and wait for it to settle
    async fn shutdown(&self) -> Result<()>;

    /// Flush any pending data
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Stops the scheduler loops and waits for their last tick to commit.
pub struct SchedulerShutdownHandler {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    heartbeats: Vec<Arc<Heartbeat>>,
    join_timeout: Duration,
}

impl SchedulerShutdownHandler {
    pub fn new(
        token: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
        heartbeats: Vec<Arc<Heartbeat>>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            token,
            tasks: Mutex::new(tasks),
            heartbeats,
            join_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for SchedulerShutdownHandler {
    async fn shutdown(&self) -> Result<()> {
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(tasks = tasks.len(), "waiting for schedulers to stop");

        let join_timeout = self.join_timeout;
        join_all(tasks.into_iter().map(|mut task| async move {
            match timeout(join_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("scheduler task ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        timeout_ms = join_timeout.as_millis() as u64,
                        "scheduler did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }))
        .await;

        for heartbeat in &self.heartbeats {
            info!(
                scheduler = heartbeat.name(),
                ticks = heartbeat.ticks(),
                stopped = heartbeat.is_stopped(),
                "scheduler shutdown complete"
            );
        }
        Ok(())
    }
}

/// Logs the final store counters. The store is memory-only, so nothing is
/// persisted.
pub struct StoreShutdownHandler {
    store: Arc<MemoryStore>,
}

impl StoreShutdownHandler {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for StoreShutdownHandler {
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let stats = self.store.stats();
        info!(
            version = stats.version,
            users = stats.users,
            farms = stats.farms,
            animals = stats.animals,
            products = stats.products,
            commits = stats.commits,
            conflicts = stats.conflicts,
            integrity_violations = stats.integrity_violations,
            "store statistics at shutdown"
        );
        Ok(())
    }
}

/// Composite shutdown handler that runs multiple handlers in sequence
pub struct CompositeShutdownHandler {
    handlers: Vec<Box<dyn ShutdownHandler>>,
}

impl CompositeShutdownHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn ShutdownHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for CompositeShutdownHandler {
    async fn shutdown(&self) -> Result<()> {
        for (idx, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.shutdown().await {
                error!(handler_index = idx, "shutdown handler error: {}", e);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        for (idx, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = handler.flush().await {
                error!(handler_index = idx, "flush handler error: {}", e);
            }
        }
        Ok(())
    }
}
