// driver.rs - Feed manifests through the flows, one notification at a time.
//
// Stands in for the cluster-side dispatcher: sources are applied to the
// store, then every source gets one notification. Policies go first so the
// cache is warm; notifications that still end in a cache miss are retried
// once after the first pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;

use kpo_exceptions::giantswarm::{PolicyException, PolicyExceptionDraft, PolicyManifest};
use kpo_exceptions::kyverno::{self, ClusterPolicy};
use kpo_exceptions::{
    Action, ClusterPolicyReconciler, ExceptionReconciler, Fetched, ObjectKey, Operation,
    OperatorConfig, Outcome, PolicyCache, ReconcileContext, ReconcileMetrics, Resource,
    ResourceStore,
};

use super::manifests::Manifests;

/// A store that can hold every kind the operator reads or writes.
pub trait OperatorStore:
    ResourceStore<ClusterPolicy>
    + ResourceStore<PolicyException>
    + ResourceStore<PolicyExceptionDraft>
    + ResourceStore<PolicyManifest>
    + ResourceStore<kyverno::PolicyException>
    + 'static
{
}

impl<T> OperatorStore for T where
    T: ResourceStore<ClusterPolicy>
        + ResourceStore<PolicyException>
        + ResourceStore<PolicyExceptionDraft>
        + ResourceStore<PolicyManifest>
        + ResourceStore<kyverno::PolicyException>
        + 'static
{
}

/// What a run did, per written exception.
#[derive(Debug, Default)]
pub struct Report {
    pub operations: BTreeMap<ObjectKey, Operation>,
    /// Sources still waiting for policies after the retry pass.
    pub waiting: BTreeMap<ObjectKey, Vec<String>>,
    pub metrics: Arc<ReconcileMetrics>,
}

impl Report {
    /// Keep the strongest operation seen for a key: a create stays a create
    /// even if later notifications found it converged.
    fn record(&mut self, outcome: &Outcome) {
        let Some(applied) = &outcome.applied else {
            return;
        };
        let entry = self
            .operations
            .entry(applied.key.clone())
            .or_insert(applied.operation);
        if *entry == Operation::Unchanged || applied.operation == Operation::Created {
            *entry = applied.operation;
        }
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.operations.values().filter(|op| **op == operation).count()
    }

    pub fn print_summary(&self) {
        for (key, operation) in &self.operations {
            println!("{:<10} {}", operation, key);
        }
        for (key, policies) in &self.waiting {
            println!("{:<10} {} (policies not found: {})", "waiting", key, policies.join(", "));
        }
        println!(
            "{} created, {} updated, {} unchanged",
            self.count(Operation::Created),
            self.count(Operation::Updated),
            self.count(Operation::Unchanged)
        );
        for (name, value) in self.metrics.snapshot() {
            if value > 0 {
                println!("{} {}", name, value);
            }
        }
    }
}

/// Create `object` or bring the stored copy in line with it.
async fn apply_source<K, S>(store: &S, mut object: K) -> anyhow::Result<()>
where
    K: Resource,
    S: ResourceStore<K> + ?Sized,
{
    let key = object.key();
    match store.fetch(&key).await {
        Fetched::Absent => {
            store.create(object).await?;
        }
        Fetched::Found(existing) => {
            object.meta_mut().uid = existing.meta().uid.clone();
            object.meta_mut().resource_version = existing.meta().resource_version.clone();
            if serde_json::to_value(&object)? != serde_json::to_value(&existing)? {
                store.update(object).await?;
            }
        }
        Fetched::Failed(e) => {
            return Err(e).with_context(|| format!("Failed to read {} {}", K::KIND, key));
        }
    }
    Ok(())
}

async fn apply_all<K, S>(store: &S, objects: Vec<K>) -> anyhow::Result<Vec<ObjectKey>>
where
    K: Resource,
    S: ResourceStore<K> + ?Sized,
{
    let mut keys = Vec::with_capacity(objects.len());
    for object in objects {
        keys.push(object.key());
        apply_source(store, object).await?;
    }
    Ok(keys)
}

enum Pending {
    Exception(ObjectKey),
    Draft(ObjectKey),
    Manifest(ObjectKey),
}

struct Flows {
    policies: ClusterPolicyReconciler,
    exceptions: ExceptionReconciler<PolicyException>,
    drafts: ExceptionReconciler<PolicyExceptionDraft>,
    manifests: ExceptionReconciler<PolicyManifest>,
}

impl Flows {
    /// One notification. Failures are already logged and counted by the flow.
    async fn notify(&self, pending: &Pending) -> Option<Outcome> {
        let result = match pending {
            Pending::Exception(key) => self.exceptions.reconcile(key).await,
            Pending::Draft(key) => self.drafts.reconcile(key).await,
            Pending::Manifest(key) => self.manifests.reconcile(key).await,
        };
        result.ok()
    }
}

fn pending_key(pending: &Pending) -> &ObjectKey {
    match pending {
        Pending::Exception(key) | Pending::Draft(key) | Pending::Manifest(key) => key,
    }
}

/// Apply `manifests` to `store` and run every flow over them.
pub async fn run<S: OperatorStore>(
    store: Arc<S>,
    config: &OperatorConfig,
    manifests: Manifests,
) -> anyhow::Result<Report> {
    let ctx = Arc::new(ReconcileContext::from_config(
        config,
        Arc::new(PolicyCache::new()),
    ));
    let flows = Flows {
        policies: ClusterPolicyReconciler::new(store.clone(), store.clone(), ctx.clone()),
        exceptions: ExceptionReconciler::new(store.clone(), store.clone(), ctx.clone()),
        drafts: ExceptionReconciler::new(store.clone(), store.clone(), ctx.clone()),
        manifests: ExceptionReconciler::new(store.clone(), store.clone(), ctx.clone()),
    };

    let store = store.as_ref();
    let policy_keys = apply_all(store, manifests.policies).await?;
    let mut queue: Vec<Pending> = Vec::new();
    let exception_keys = apply_all(store, manifests.exceptions).await?;
    queue.extend(exception_keys.into_iter().map(Pending::Exception));
    let draft_keys = apply_all(store, manifests.drafts).await?;
    queue.extend(draft_keys.into_iter().map(Pending::Draft));
    let manifest_keys = apply_all(store, manifests.manifests).await?;
    queue.extend(manifest_keys.into_iter().map(Pending::Manifest));
    tracing::info!(
        policies = policy_keys.len(),
        sources = queue.len(),
        "applied manifests"
    );

    let mut report = Report {
        metrics: ctx.metrics.clone(),
        ..Report::default()
    };

    for key in &policy_keys {
        if let Ok(outcome) = flows.policies.reconcile(key).await {
            report.record(&outcome);
        }
    }

    let mut retry = Vec::new();
    for pending in queue {
        if let Some(outcome) = flows.notify(&pending).await {
            if matches!(outcome.action, Action::AwaitPolicies { .. }) {
                retry.push(pending);
            } else {
                report.record(&outcome);
            }
        }
    }

    for pending in retry {
        let Some(outcome) = flows.notify(&pending).await else {
            continue;
        };
        match &outcome.action {
            Action::AwaitPolicies { policies, .. } => {
                report
                    .waiting
                    .insert(pending_key(&pending).clone(), policies.clone());
            }
            _ => report.record(&outcome),
        }
    }

    Ok(report)
}
