//! Liveness, readiness and per-component health for the ops endpoints.
//!
//! Components are the store and one entry per scheduler heartbeat. A stopped
//! scheduler or a store whose lock cannot be taken makes the service unready;
//! a stale scheduler or recorded integrity violations only degrade it.

use crate::error::{ERROR_METRICS, ErrorKind};
use crate::scheduler::Heartbeat;
use crate::state::AppState;
use crate::store::StoreStats;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How long the store check may wait for the table read lock.
const STORE_PING_TIMEOUT: Duration = Duration::from_millis(100);

/// Ordered from best to worst, so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Degraded still serves traffic.
    pub fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: Value,
}

impl ComponentHealth {
    fn new(status: HealthStatus, details: Value) -> Self {
        Self {
            status,
            error: None,
            details,
        }
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.error = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    /// Unhealthy components, by name
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let code = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, Json(self)).into_response()
    }
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// The process is up and answering; nothing else is consulted.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: Utc::now().timestamp(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components().await;
        let status = overall(components.values());
        let not_ready = components
            .iter()
            .filter(|(_, health)| health.status == HealthStatus::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect();

        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: Utc::now().timestamp(),
            not_ready,
        }
    }

    pub async fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components().await;
        ComponentHealthResponse {
            status: overall(components.values()),
            timestamp: Utc::now().timestamp(),
            components,
        }
    }

    async fn check_all_components(&self) -> BTreeMap<String, ComponentHealth> {
        let mut components = BTreeMap::new();
        components.insert("store".to_string(), self.check_store().await);
        for heartbeat in self.state.heartbeats() {
            components.insert(
                format!("{}_scheduler", heartbeat.name()),
                scheduler_health(heartbeat),
            );
        }
        components
    }

    /// Takes the table read lock off the async runtime; a writer wedged on
    /// the lock must not stall the health endpoint too.
    async fn check_store(&self) -> ComponentHealth {
        let store = self.state.store().clone();
        let checked = tokio::task::spawn_blocking(move || {
            store.ping(STORE_PING_TIMEOUT).then(|| store.stats())
        })
        .await;

        match checked {
            Ok(stats) => store_health(stats, ERROR_METRICS.get_error_count(&ErrorKind::Fatal)),
            Err(e) => ComponentHealth::new(HealthStatus::Unhealthy, Value::Null)
                .because(format!("store check failed: {}", e)),
        }
    }
}

fn overall<'a>(components: impl Iterator<Item = &'a ComponentHealth>) -> HealthStatus {
    components
        .map(|health| health.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

/// `stats` is `None` when the lock was not acquired in time.
fn store_health(stats: Option<StoreStats>, integrity_errors: u64) -> ComponentHealth {
    let Some(stats) = stats else {
        return ComponentHealth::new(
            HealthStatus::Unhealthy,
            json!({ "timeout_ms": STORE_PING_TIMEOUT.as_millis() as u64 }),
        )
        .because("store lock not acquired in time");
    };

    let mut details = serde_json::to_value(&stats).unwrap_or_default();
    details["integrity_errors"] = json!(integrity_errors);

    if integrity_errors > 0 {
        ComponentHealth::new(HealthStatus::Degraded, details)
            .because(format!("{} integrity violations recorded", integrity_errors))
    } else {
        ComponentHealth::new(HealthStatus::Healthy, details)
    }
}

fn scheduler_health(heartbeat: &Heartbeat) -> ComponentHealth {
    let since_last_tick = heartbeat.since_last_tick();
    let details = json!({
        "interval_ms": heartbeat.interval().as_millis() as u64,
        "ticks": heartbeat.ticks(),
        "since_last_tick_ms": since_last_tick.as_millis() as u64,
        "last_report": heartbeat.last_report(),
    });

    if heartbeat.is_stopped() {
        ComponentHealth::new(HealthStatus::Unhealthy, details).because("scheduler stopped")
    } else if heartbeat.is_stale() {
        ComponentHealth::new(HealthStatus::Degraded, details).because(format!(
            "no completed tick for {}ms",
            since_last_tick.as_millis()
        ))
    } else {
        ComponentHealth::new(HealthStatus::Healthy, details)
    }
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness().await
}

pub async fn components_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.components().await
}
