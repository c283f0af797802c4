// cache.rs - Process-wide cache of known policies.
//
// The ClusterPolicy flow writes it; every exception flow reads it. Entries
// are `Arc` snapshots replaced wholesale, so a reader holding a record keeps
// a complete old or new version, never a mix. The lock is only held for the
// map operation itself and never across an await point.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::policy::PolicyRecord;

/// Shared policy cache. Construct once and hand out as `Arc<PolicyCache>`.
#[derive(Debug, Default)]
pub struct PolicyCache {
    entries: RwLock<HashMap<String, Arc<PolicyRecord>>>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `record.name`. Returns the previous record.
    pub fn insert(&self, record: PolicyRecord) -> Option<Arc<PolicyRecord>> {
        // Writers only ever swap whole Arcs, so a poisoned map is still consistent.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(record.name.clone(), Arc::new(record))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<PolicyRecord>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PolicyRecord>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All cached records, sorted by policy name.
    pub fn snapshot(&self) -> Vec<Arc<PolicyRecord>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = entries.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
