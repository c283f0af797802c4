// orchestrator.rs - Idempotent create-or-update of engine exceptions.
//
// The desired object is produced by a caller-supplied mutation applied to
// either a fresh object or a copy of the stored one. A write happens only
// when the mutation changed something the engine would observe.

use std::fmt;

use tracing::{debug, info};

use crate::diff::exceptions_converged;
use crate::kyverno::PolicyException;
use crate::meta::{ObjectKey, OwnerReference, Resource};
use crate::store::{Fetched, ResourceStore, StoreError};

/// What a create-or-update call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Operation::Created => "created",
            Operation::Updated => "updated",
            Operation::Unchanged => "unchanged",
        })
    }
}

/// Whether `desired` differs from `observed` in anything that is written.
fn needs_update(observed: &PolicyException, desired: &PolicyException) -> bool {
    !exceptions_converged(&observed.spec.exceptions, &desired.spec.exceptions)
        || observed.spec.match_resources != desired.spec.match_resources
        || observed.spec.background != desired.spec.background
        || observed.metadata.labels != desired.metadata.labels
        || observed.metadata.owner_references != desired.metadata.owner_references
}

/// Bring the exception at `key` to the state produced by `mutate`.
///
/// Absent objects are created. Present objects are updated with the version
/// token they were read with, unless the mutation left them equivalent.
/// An object controlled by someone other than `owner` is left untouched and
/// reported as [`StoreError::AlreadyOwned`]. Store errors are returned as-is;
/// nothing is retried or deleted here.
pub async fn create_or_update<F>(
    store: &dyn ResourceStore<PolicyException>,
    key: &ObjectKey,
    owner: Option<&OwnerReference>,
    mutate: F,
) -> Result<Operation, StoreError>
where
    F: FnOnce(&mut PolicyException) + Send,
{
    match store.fetch(key).await {
        Fetched::Failed(e) => Err(e),
        Fetched::Absent => {
            let mut fresh = PolicyException::new(key);
            mutate(&mut fresh);
            pin_identity(&mut fresh, key, None);
            claim(&mut fresh, key, owner)?;

            store.create(fresh).await?;
            info!(exception = %key, "created policy exception");
            Ok(Operation::Created)
        }
        Fetched::Found(observed) => {
            let mut desired = observed.clone();
            mutate(&mut desired);
            pin_identity(&mut desired, key, observed.metadata.resource_version.clone());
            claim(&mut desired, key, owner)?;

            if !needs_update(&observed, &desired) {
                debug!(exception = %key, "policy exception already converged");
                return Ok(Operation::Unchanged);
            }
            // Reordering alone is not a change; keep the stored order.
            if exceptions_converged(&observed.spec.exceptions, &desired.spec.exceptions) {
                desired.spec.exceptions = observed.spec.exceptions;
            }

            store.update(desired).await?;
            info!(exception = %key, "updated policy exception");
            Ok(Operation::Updated)
        }
    }
}

fn claim(
    object: &mut PolicyException,
    key: &ObjectKey,
    owner: Option<&OwnerReference>,
) -> Result<(), StoreError> {
    let Some(owner) = owner else {
        return Ok(());
    };
    object
        .metadata
        .set_controller_reference(owner.clone())
        .map_err(|current| StoreError::AlreadyOwned {
            kind: PolicyException::KIND,
            key: key.clone(),
            controller: format!("{} {} ({})", current.kind, current.name, current.uid),
        })
}

/// The mutation may not move the object or drop its version token.
fn pin_identity(object: &mut PolicyException, key: &ObjectKey, version: Option<String>) {
    object.metadata.name = key.name.clone();
    object.metadata.namespace = key.namespace.clone();
    object.metadata.resource_version = version;
}
