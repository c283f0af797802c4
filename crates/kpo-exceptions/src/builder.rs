// builder.rs - Build per-policy exception entries from cached policies.

use std::sync::Arc;

use crate::cache::PolicyCache;
use crate::error::{ReconcileError, Result};
use crate::kyverno::Exception;
use crate::policy::PolicyRecord;

/// Build one exception per policy name, resolving rules through `cache`.
///
/// Every name must be cached; otherwise the missing names are reported as
/// [`ReconcileError::PolicyNotCached`] and nothing is built. A name listed
/// twice yields a single entry.
pub fn build_exceptions(policies: &[String], cache: &PolicyCache) -> Result<Vec<Exception>> {
    let mut records = Vec::with_capacity(policies.len());
    let mut missing = Vec::new();

    for name in policies {
        match cache.get(name) {
            Some(record) => records.push(record),
            None if !missing.contains(name) => missing.push(name.clone()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(ReconcileError::PolicyNotCached { policies: missing });
    }
    Ok(exceptions_from_records(&records))
}

/// Build exceptions from already-resolved records.
///
/// Records sharing a policy name collapse into one entry at the position of
/// the first occurrence, holding the rules of the last one.
pub fn exceptions_from_records(records: &[Arc<PolicyRecord>]) -> Vec<Exception> {
    let mut exceptions: Vec<Exception> = Vec::with_capacity(records.len());
    for record in records {
        let entry = Exception {
            policy_name: record.name.clone(),
            rule_names: record.rule_names(),
        };
        match exceptions.iter_mut().find(|e| e.policy_name == entry.policy_name) {
            Some(existing) => *existing = entry,
            None => exceptions.push(entry),
        }
    }
    exceptions
}
