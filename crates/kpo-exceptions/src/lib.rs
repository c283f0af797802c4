//! # kpo-exceptions
//!
//! Exception translation and reconciliation for the Kyverno policy operator.
//!
//! User-facing exception declarations (`PolicyException`,
//! `PolicyExceptionDraft`, `PolicyManifest` in `policy.giantswarm.io`) name
//! policies and abstract workload targets. This crate turns them into the
//! engine's own `PolicyException` objects and keeps those convergent as
//! policies and targets change.
//!
//! ## Key components
//!
//! - [`kinds`] / [`target`]: pure target -> match filter translation
//! - [`PolicyCache`]: known policies, written by the ClusterPolicy flow
//! - [`builder`] / [`diff`]: per-policy exception entries and their
//!   order-independent comparison
//! - [`create_or_update`]: the only place objects are written
//! - [`JitterScheduler`]: randomized requeue delays
//! - [`ExceptionReconciler`] / [`ClusterPolicyReconciler`]: the flows
//!
//! ## Key invariants
//!
//! - A translated target never lists a kind twice and always covers `Pod`.
//! - Equal exception sets never cause a write, whatever their order.
//! - A policy missing from the cache is a retry, not a failure.

pub mod builder;
pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod giantswarm;
pub mod jitter;
pub mod kinds;
pub mod kyverno;
pub mod meta;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod target;

pub use cache::PolicyCache;
pub use config::{BypassConfig, ConfigError, OperatorConfig};
pub use error::ReconcileError;
pub use jitter::JitterScheduler;
pub use meta::{ObjectKey, Resource};
pub use metrics::{Flow, ReconcileMetrics};
pub use orchestrator::{create_or_update, Operation};
pub use policy::PolicyRecord;
pub use reconcile::{
    Action, Applied, ClusterPolicyReconciler, ExceptionReconciler, Outcome, ReconcileContext,
};
pub use source::ExceptionSource;
pub use store::{FileStore, Fetched, MemoryStore, ResourceStore, StoreError};
