//! In-process transactional store for users, farms, animals and products.
//!
//! Transactions are optimistic: reads are recorded with the version they
//! observed, writes are buffered, and commit re-validates everything under
//! the table write lock. A changed read aborts with [`StoreError::Conflict`];
//! a commit that would orphan a row aborts with [`StoreError::Integrity`].

mod table;
mod transaction;

pub use transaction::{Snapshot, Transaction};

use crate::domain::{AnimalId, FarmId, ProductId, UserId};
use crate::error::{LedgerResult, StoreError};
use crate::model::{Animal, Farm, Product, User};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use table::Table;

pub(crate) struct Tables {
    pub version: u64,
    pub users: Table<UserId, User>,
    pub farms: Table<FarmId, Farm>,
    pub animals: Table<AnimalId, Animal>,
    pub products: Table<ProductId, Product>,
}

impl Tables {
    fn new() -> Self {
        Self {
            version: 0,
            users: Table::new(),
            farms: Table::new(),
            animals: Table::new(),
            products: Table::new(),
        }
    }
}

/// Point-in-time counters for health reporting and shutdown logs.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub version: u64,
    pub users: usize,
    pub farms: usize,
    pub animals: usize,
    pub products: usize,
    pub commits: u64,
    pub conflicts: u64,
    pub integrity_violations: u64,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    commits: AtomicU64,
    conflicts: AtomicU64,
    integrity_violations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            integrity_violations: AtomicU64::new(0),
        }
    }

    /// Runs `work` inside a transaction and commits its writes.
    ///
    /// If `work` returns an error nothing is written. Commit failures are
    /// converted into ledger errors (`Transient` for conflicts, `Fatal` for
    /// integrity violations).
    ///
    /// An error from `work` is only returned as-is if everything it read is
    /// still current. Otherwise it was decided on a view another commit has
    /// since replaced, and the caller gets a conflict to retry instead.
    pub fn transaction<T, F>(&self, work: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> LedgerResult<T>,
    {
        let mut tx = Transaction::begin(self);
        let value = match work(&mut tx) {
            Ok(value) => value,
            Err(error) => {
                let stale = tx.validate(&self.tables.read());
                return match stale {
                    Ok(()) => Err(error),
                    Err(conflict) => {
                        tracing::debug!(
                            discarded_kind = %error.kind,
                            discarded = %error.message,
                            "error raised from a stale read, reporting conflict"
                        );
                        self.record_conflict(&conflict);
                        Err(conflict.into())
                    }
                };
            }
        };
        self.commit(tx)?;
        Ok(value)
    }

    /// Consistent read-only view of committed state.
    ///
    /// Holds the table read lock until dropped, so keep it short-lived.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(self.tables.read())
    }

    /// True if the tables can be locked for reading within `timeout`.
    pub fn ping(&self, timeout: Duration) -> bool {
        self.tables.try_read_for(timeout).is_some()
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        StoreStats {
            version: tables.version,
            users: tables.users.len(),
            farms: tables.farms.len(),
            animals: tables.animals.len(),
            products: tables.products.len(),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            integrity_violations: self.integrity_violations.load(Ordering::Relaxed),
        }
    }

    fn record_conflict(&self, error: &StoreError) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        if let StoreError::Conflict { table, detail } = error {
            crate::metrics::METRICS.record_store_conflict(table);
            tracing::debug!(table = *table, detail = %detail, "transaction conflict");
        }
    }

    fn commit(&self, tx: Transaction<'_>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();

        if let Err(error) = tx.validate(&tables) {
            drop(tables);
            self.record_conflict(&error);
            return Err(error);
        }

        if !tx.is_dirty() {
            return Ok(tables.version);
        }

        if let Err(error) = tx.check_integrity(&tables) {
            self.integrity_violations.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %error, "commit rejected by integrity check");
            return Err(error);
        }

        tables.version += 1;
        let version = tables.version;
        let written = tx.apply(&mut tables, version);
        self.commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(version, written, "transaction committed");
        Ok(version)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .finish()
    }
}
