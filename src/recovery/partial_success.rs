//! Per-item batch processing: one item's failure never stops the rest

use crate::error::{ErrorKind, LedgerResult};

/// Outcome of a batch run
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure>,
    /// Items attempted
    pub total: usize,
}

/// A failed batch item
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Position of the item in the batch
    pub index: usize,
    /// Identifier for the failed item (e.g. an animal id)
    pub item_id: String,
    pub kind: ErrorKind,
    pub error: String,
}

impl BatchFailure {
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

impl<T> BatchResult<T> {
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.failed.iter().any(BatchFailure::is_fatal)
    }
}

/// Runs `processor` over every item, recording failures instead of
/// propagating them. `identify` labels an item for its failure record.
pub fn process_batch<T, I, F, N>(items: Vec<I>, identify: N, mut processor: F) -> BatchResult<T>
where
    N: Fn(&I) -> String,
    F: FnMut(usize, I) -> LedgerResult<T>,
{
    let total = items.len();
    let mut result = BatchResult {
        succeeded: Vec::with_capacity(total),
        failed: Vec::new(),
        total,
    };

    for (index, item) in items.into_iter().enumerate() {
        let item_id = identify(&item);
        match processor(index, item) {
            Ok(processed) => result.succeeded.push(processed),
            Err(err) => result.failed.push(BatchFailure {
                index,
                item_id,
                kind: err.kind,
                error: err.message,
            }),
        }
    }

    result
}
