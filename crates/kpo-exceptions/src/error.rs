// error.rs - Error types for the reconciliation flows.

use thiserror::Error;

use crate::store::StoreError;

/// Errors a reconciliation can end with.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Referenced policies have not been observed by the ClusterPolicy flow yet.
    /// Resolves once their change notifications are processed.
    #[error("policies not cached yet: {}", policies.join(", "))]
    PolicyNotCached { policies: Vec<String> },

    /// The object store rejected a fetch or write. Passed through unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Retryable errors are requeued quietly instead of counted as failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PolicyNotCached { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
