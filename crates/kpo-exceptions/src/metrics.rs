// metrics.rs - Failed-reconciliation counters, one per flow.
//
// Export is left to whoever embeds the library; the counters are plain
// atomics so flows running concurrently can bump them without locking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A reconciliation flow, named after the source kind it watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flow {
    ClusterPolicy,
    PolicyException,
    PolicyManifest,
    PolicyExceptionDraft,
}

impl Flow {
    pub const ALL: [Flow; 4] = [
        Flow::ClusterPolicy,
        Flow::PolicyException,
        Flow::PolicyManifest,
        Flow::PolicyExceptionDraft,
    ];

    pub fn counter_name(self) -> &'static str {
        match self {
            Flow::ClusterPolicy => "cluster_policy_controller_failed_reconciliations_total",
            Flow::PolicyException => "policy_exception_controller_failed_reconciliations_total",
            Flow::PolicyManifest => "policy_manifest_controller_failed_reconciliations_total",
            Flow::PolicyExceptionDraft => {
                "policy_exception_draft_controller_failed_reconciliations_total"
            }
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flow::ClusterPolicy => "clusterpolicy",
            Flow::PolicyException => "policyexception",
            Flow::PolicyManifest => "policymanifest",
            Flow::PolicyExceptionDraft => "policyexceptiondraft",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    failures: [AtomicU64; 4],
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, flow: Flow) {
        self.failures[flow.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self, flow: Flow) -> u64 {
        self.failures[flow.index()].load(Ordering::Relaxed)
    }

    /// Counter name -> value, for every flow.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Flow::ALL
            .iter()
            .map(|flow| (flow.counter_name(), self.failures(*flow)))
            .collect()
    }

    pub fn total_failures(&self) -> u64 {
        Flow::ALL.iter().map(|flow| self.failures(*flow)).sum()
    }
}
