//! Object store capability.
//!
//! The operator never talks to a cluster directly. Each object kind is
//! reached through a [`ResourceStore`], which fetches by identity, creates,
//! and updates with optimistic concurrency on the version token.
//!
//! - [`MemoryStore`] keeps objects in memory and counts writes (tests, `kpo render`)
//! - [`FileStore`] keeps one JSON file per object (`kpo reconcile`)

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, WriteCounts};

use async_trait::async_trait;
use thiserror::Error;

use crate::meta::{ObjectKey, Resource};

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// The object changed since it was read.
    #[error("conflict writing {kind} {key}: sent resourceVersion {sent:?}, stored {stored:?}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        sent: Option<String>,
        stored: Option<String>,
    },

    /// Namespace or name cannot be used as an object identity by this store.
    #[error("invalid identity for {kind}: {key:?}")]
    InvalidKey { kind: &'static str, key: ObjectKey },

    /// The object is controlled by a different owner.
    #[error("{kind} {key} is already controlled by {controller}")]
    AlreadyOwned {
        kind: &'static str,
        key: ObjectKey,
        controller: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a fetch. Absence is an expected state, not an error.
#[derive(Debug)]
pub enum Fetched<K> {
    Found(K),
    Absent,
    Failed(StoreError),
}

#[cfg(test)]
impl<K> Fetched<K> {
    pub fn found(self) -> Option<K> {
        match self {
            Fetched::Found(object) => Some(object),
            Fetched::Absent | Fetched::Failed(_) => None,
        }
    }
}

/// Capability over one object kind.
///
/// Calls are bounded by the caller: dropping the returned future abandons
/// the call, and implementations must not retry on their own.
#[async_trait]
pub trait ResourceStore<K: Resource>: Send + Sync {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<K>;

    /// Create `object`. Assigns a uid and the first version token.
    async fn create(&self, object: K) -> Result<K, StoreError>;

    /// Replace the stored object. The object must carry the current version token.
    async fn update(&self, object: K) -> Result<K, StoreError>;
}
