//! Versioned tables and the per-transaction read/write sets layered on them.

use crate::error::StoreError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct Versioned<V> {
    pub version: u64,
    pub value: V,
}

/// Committed rows of one entity kind. Every write stamps the commit version.
#[derive(Debug)]
pub(crate) struct Table<K, V> {
    rows: HashMap<K, Versioned<V>>,
}

impl<K, V> Table<K, V>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&Versioned<V>> {
        self.rows.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values().map(|row| &row.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Versioned<V>)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn matching(&self, predicate: &(dyn Fn(&V) -> bool + Send + Sync)) -> HashMap<K, u64> {
        self.rows
            .iter()
            .filter(|(_, row)| predicate(&row.value))
            .map(|(key, row)| (*key, row.version))
            .collect()
    }
}

type Predicate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// A predicate read and the committed rows (with versions) it matched.
struct ScanRecord<K, V> {
    predicate: Predicate<V>,
    seen: HashMap<K, u64>,
}

/// Buffered view of one table inside a transaction.
///
/// Reads go to committed state and are recorded; writes stay local until
/// commit. `None` in the write set marks a delete.
pub(crate) struct TxTable<K, V> {
    name: &'static str,
    reads: HashMap<K, Option<u64>>,
    scans: Vec<ScanRecord<K, V>>,
    writes: HashMap<K, Option<V>>,
}

impl<K, V> TxTable<K, V>
where
    K: Copy + Eq + Hash + Debug,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            reads: HashMap::new(),
            scans: Vec::new(),
            writes: HashMap::new(),
        }
    }

    pub fn get(&mut self, committed: &Table<K, V>, key: K) -> Option<V> {
        if let Some(written) = self.writes.get(&key) {
            return written.clone();
        }
        let row = committed.get(&key);
        self.reads.entry(key).or_insert(row.map(|r| r.version));
        row.map(|r| r.value.clone())
    }

    pub fn scan<F>(&mut self, committed: &Table<K, V>, predicate: F) -> Vec<V>
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate<V> = Arc::new(predicate);
        let seen = committed.matching(predicate.as_ref());

        let mut results: HashMap<K, V> = seen
            .keys()
            .filter(|key| !self.writes.contains_key(key))
            .filter_map(|key| committed.get(key).map(|row| (*key, row.value.clone())))
            .collect();
        for (key, written) in &self.writes {
            if let Some(value) = written {
                if predicate(value) {
                    results.insert(*key, value.clone());
                }
            }
        }

        self.scans.push(ScanRecord { predicate, seen });
        results.into_values().collect()
    }

    pub fn put(&mut self, key: K, value: V) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: K) {
        self.writes.insert(key, None);
    }

    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Written values that will exist after commit.
    pub fn upserts(&self) -> impl Iterator<Item = (&K, &V)> {
        self.writes
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key, v)))
    }

    pub fn deletes(&self) -> impl Iterator<Item = &K> {
        self.writes
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key)
    }

    /// Value of `key` as it will be after this transaction commits.
    pub fn resolved<'a>(&'a self, committed: &'a Table<K, V>, key: &K) -> Option<&'a V> {
        match self.writes.get(key) {
            Some(written) => written.as_ref(),
            None => committed.get(key).map(|row| &row.value),
        }
    }

    /// Committed rows that survive this transaction, followed by its upserts.
    pub fn resolved_values<'a>(&'a self, committed: &'a Table<K, V>) -> Vec<&'a V> {
        committed
            .iter()
            .filter(|(key, _)| !self.writes.contains_key(key))
            .map(|(_, row)| &row.value)
            .chain(self.upserts().map(|(_, value)| value))
            .collect()
    }

    /// Fails if anything this transaction observed has changed since.
    pub fn validate(&self, committed: &Table<K, V>) -> Result<(), StoreError> {
        for (key, observed) in &self.reads {
            let current = committed.get(key).map(|row| row.version);
            if current != *observed {
                return Err(StoreError::Conflict {
                    table: self.name,
                    detail: format!("row {:?} changed since it was read", key),
                });
            }
        }

        for scan in &self.scans {
            let current = committed.matching(scan.predicate.as_ref());
            if current != scan.seen {
                return Err(StoreError::Conflict {
                    table: self.name,
                    detail: format!(
                        "scan result changed ({} rows read, {} rows now)",
                        scan.seen.len(),
                        current.len()
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn apply(self, committed: &mut Table<K, V>, version: u64) -> usize {
        let count = self.writes.len();
        for (key, write) in self.writes {
            match write {
                Some(value) => {
                    committed.rows.insert(key, Versioned { version, value });
                }
                None => {
                    committed.rows.remove(&key);
                }
            }
        }
        count
    }
}
