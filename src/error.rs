//! Error taxonomy for ledger and scheduler operations
//!
//! This module provides:
//! - The five error kinds callers are allowed to observe
//! - Rich error context (operation, user, farm, entity)
//! - Error telemetry counters
//! - A builder for constructing errors
//! - The store-level error type and its mapping onto the taxonomy

use crate::domain::{FarmId, UserId, ValidationError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// =============================================================================
// ERROR KINDS
// =============================================================================

/// The only failure classes that cross the ledger boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Entity absent. Deletions may treat this as success.
    NotFound,
    /// Caller is authenticated but does not own the farm
    Forbidden,
    /// Business rule violated (insufficient balance, insufficient stock, bad input)
    InvalidOperation,
    /// Store contention; the whole operation is safe to retry
    Transient,
    /// Data integrity violation (e.g. an animal whose farm is gone)
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidOperation => "business_rule",
            ErrorKind::Transient => "contention",
            ErrorKind::Fatal => "integrity",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// ERROR CONTEXT
// =============================================================================

/// Context attached to a ledger error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation that was being performed
    pub operation: Option<String>,
    /// Requesting user, if any
    pub user_id: Option<UserId>,
    /// Farm involved, if any
    pub farm_id: Option<FarmId>,
    /// Animal or product id involved, if any
    pub entity_id: Option<String>,
    /// Additional parameters
    pub params: HashMap<String, serde_json::Value>,
}

// =============================================================================
// LEDGER ERROR TYPE
// =============================================================================

/// Main error type for ledger operations
#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub kind: ErrorKind,
    pub message: String,
    /// Unique error ID for tracking
    pub error_id: String,
    pub context: ErrorContext,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_id: Self::generate_error_id(),
            context: ErrorContext::default(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn builder(kind: ErrorKind) -> ErrorBuilder {
        ErrorBuilder::new(kind)
    }

    pub fn not_found() -> ErrorBuilder {
        ErrorBuilder::new(ErrorKind::NotFound)
    }

    pub fn forbidden() -> ErrorBuilder {
        ErrorBuilder::new(ErrorKind::Forbidden)
    }

    pub fn invalid() -> ErrorBuilder {
        ErrorBuilder::new(ErrorKind::InvalidOperation)
    }

    pub fn transient() -> ErrorBuilder {
        ErrorBuilder::new(ErrorKind::Transient)
    }

    pub fn fatal() -> ErrorBuilder {
        ErrorBuilder::new(ErrorKind::Fatal)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Attach the operation name unless one is already set
    pub fn in_operation(mut self, operation: &str) -> Self {
        if self.context.operation.is_none() {
            self.context.operation = Some(operation.to_string());
        }
        self
    }

    /// Add this error to telemetry
    pub fn track(&self) {
        ERROR_METRICS.record_error(&self.kind, self.context.operation.as_deref());
    }

    fn generate_error_id() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis();
        format!("err_{:x}_{:x}", timestamp, count)
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(operation) = &self.context.operation {
            write!(f, " (operation: {})", operation)?;
        }
        Ok(())
    }
}

impl std::error::Error for LedgerError {}

impl From<ValidationError> for LedgerError {
    fn from(error: ValidationError) -> Self {
        LedgerError::new(ErrorKind::InvalidOperation, error.to_string())
    }
}

// =============================================================================
// ERROR BUILDER
// =============================================================================

/// Builder for constructing rich errors
pub struct ErrorBuilder {
    error: LedgerError,
}

impl ErrorBuilder {
    fn new(kind: ErrorKind) -> Self {
        Self {
            error: LedgerError::new(kind, ""),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error.message = message.into();
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.error.context.operation = Some(operation.into());
        self
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.error.context.user_id = Some(user_id);
        self
    }

    pub fn farm(mut self, farm_id: FarmId) -> Self {
        self.error.context.farm_id = Some(farm_id);
        self
    }

    pub fn entity(mut self, entity_id: impl fmt::Display) -> Self {
        self.error.context.entity_id = Some(entity_id.to_string());
        self
    }

    /// Add a parameter to the context
    pub fn param(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.error.context.params.insert(key.into(), json_value);
        }
        self
    }

    pub fn build(self) -> LedgerError {
        self.error
    }
}

// =============================================================================
// STORE ERRORS
// =============================================================================

/// Failures raised by the transactional store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A row or scan read by the transaction changed before commit
    #[error("write conflict on {table}: {detail}")]
    Conflict { table: &'static str, detail: String },

    /// Commit would break the ownership chain
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match &error {
            StoreError::Conflict { table, .. } => LedgerError::transient()
                .message(error.to_string())
                .param("table", table)
                .build(),
            StoreError::Integrity(_) => LedgerError::fatal().message(error.to_string()).build(),
        }
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

/// Process-wide error counters by kind
#[derive(Debug)]
pub struct ErrorMetrics {
    kind_counts: RwLock<HashMap<ErrorKind, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            kind_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Record an error occurrence
    pub fn record_error(&self, kind: &ErrorKind, operation: Option<&str>) {
        increment(&self.kind_counts, kind, || *kind);

        tracing::debug!(
            error_kind = %kind,
            operation = operation,
            category = kind.category(),
            "error recorded"
        );
    }

    pub fn get_error_count(&self, kind: &ErrorKind) -> u64 {
        self.kind_counts
            .read()
            .get(kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment<K, Q, F>(map: &RwLock<HashMap<K, AtomicU64>>, key: &Q, owned: F)
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
    F: FnOnce() -> K,
{
    {
        let read = map.read();
        if let Some(counter) = read.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .entry(owned())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);
