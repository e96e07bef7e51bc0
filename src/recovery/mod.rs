//! Error recovery for ledger transactions and scheduler ticks
//!
//! This module provides:
//! - Retry with exponential backoff for transactions that lost an optimistic race
//! - Partial success handling so one bad animal never sinks a whole tick

mod partial_success;
mod retry;

pub use partial_success::{BatchFailure, BatchResult, process_batch};
pub use retry::{ExponentialBackoff, RetryConfig, RetryPolicy, retry_async_with_policy};
