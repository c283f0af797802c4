//! Reconciliation flows.
//!
//! [`ExceptionReconciler`] handles every source kind that yields one engine
//! exception (see [`ExceptionSource`]). [`ClusterPolicyReconciler`] is the
//! only writer of the [`PolicyCache`] and maintains the service-account
//! bypass exception.
//!
//! Each `reconcile` call handles one notification for one object identity
//! and tells the dispatcher when to look at that identity again. Dropping
//! the returned future abandons the call at its next store access.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::builder::{build_exceptions, exceptions_from_records};
use crate::cache::PolicyCache;
use crate::config::{BypassConfig, OperatorConfig};
use crate::error::{ReconcileError, Result};
use crate::jitter::JitterScheduler;
use crate::kyverno::{
    ClusterPolicy, MatchResources, PolicyException, ResourceDescription, ResourceFilter, Subject,
};
use crate::meta::{managed_labels, ObjectKey};
use crate::metrics::{Flow, ReconcileMetrics};
use crate::orchestrator::{create_or_update, Operation};
use crate::policy::PolicyRecord;
use crate::source::ExceptionSource;
use crate::store::{Fetched, ResourceStore};
use crate::target::translate_targets;

/// Name of the exception letting the deployment service account through.
pub const BYPASS_EXCEPTION_NAME: &str = "chart-operator-generated-sa-bypass";

/// Operations the bypass exception covers.
pub const BYPASS_OPERATIONS: [&str; 2] = ["CREATE", "UPDATE"];

/// What the dispatcher should do with an identity after a reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until the object changes again.
    AwaitChange,
    /// Check again after the delay.
    Requeue(Duration),
    /// Referenced policies are not cached yet; retry after the delay.
    AwaitPolicies {
        policies: Vec<String>,
        retry_after: Duration,
    },
}

impl Action {
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Action::AwaitChange => None,
            Action::Requeue(delay) => Some(*delay),
            Action::AwaitPolicies { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// The exception a reconcile wrote, or found already converged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub key: ObjectKey,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub action: Action,
    pub applied: Option<Applied>,
}

impl Outcome {
    fn idle() -> Self {
        Self {
            action: Action::AwaitChange,
            applied: None,
        }
    }
}

/// State and settings shared by every flow.
#[derive(Debug)]
pub struct ReconcileContext {
    pub cache: Arc<PolicyCache>,
    pub metrics: Arc<ReconcileMetrics>,
    pub scheduler: JitterScheduler,
    pub retry_scheduler: JitterScheduler,
    pub destination_namespace: String,
    pub background_mode: bool,
    pub bypass: BypassConfig,
}

impl ReconcileContext {
    pub fn from_config(config: &OperatorConfig, cache: Arc<PolicyCache>) -> Self {
        Self {
            cache,
            metrics: Arc::new(ReconcileMetrics::new()),
            scheduler: config.requeue_scheduler(),
            retry_scheduler: config.cache_miss_scheduler(),
            destination_namespace: config.destination_namespace.clone(),
            background_mode: config.background_mode,
            bypass: config.bypass.clone(),
        }
    }
}

/// Count and log a failed reconcile; retryable errors pass quietly.
fn settle(
    flow: Flow,
    key: &ObjectKey,
    result: Result<Outcome>,
    metrics: &ReconcileMetrics,
) -> Result<Outcome> {
    if let Err(e) = &result {
        if !e.is_retryable() {
            metrics.record_failure(flow);
            warn!(flow = %flow, object = %key, error = %e, "reconciliation failed");
        }
    }
    result
}

/// Translates one source object into one engine exception.
pub struct ExceptionReconciler<S: ExceptionSource> {
    sources: Arc<dyn ResourceStore<S>>,
    exceptions: Arc<dyn ResourceStore<PolicyException>>,
    ctx: Arc<ReconcileContext>,
}

impl<S: ExceptionSource> ExceptionReconciler<S> {
    pub fn new(
        sources: Arc<dyn ResourceStore<S>>,
        exceptions: Arc<dyn ResourceStore<PolicyException>>,
        ctx: Arc<ReconcileContext>,
    ) -> Self {
        Self {
            sources,
            exceptions,
            ctx,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        let result = self.apply(key).await;
        settle(S::FLOW, key, result, &self.ctx.metrics)
    }

    async fn apply(&self, key: &ObjectKey) -> Result<Outcome> {
        let flow = S::FLOW;
        let source = match self.sources.fetch(key).await {
            Fetched::Found(source) => source,
            Fetched::Absent => {
                // The written exception goes away with its owner.
                debug!(flow = %flow, object = %key, "source gone");
                return Ok(Outcome::idle());
            }
            Fetched::Failed(e) => return Err(e.into()),
        };
        if source.meta().is_being_deleted() {
            debug!(flow = %flow, object = %key, "source is being deleted");
            return Ok(Outcome::idle());
        }

        let exceptions = match build_exceptions(&source.policies(), &self.ctx.cache) {
            Ok(exceptions) => exceptions,
            Err(ReconcileError::PolicyNotCached { policies }) => {
                let retry_after = self.ctx.retry_scheduler.next_delay();
                info!(
                    flow = %flow,
                    object = %key,
                    policies = %policies.join(","),
                    retry_after_secs = retry_after.as_secs(),
                    "policies not cached yet, retrying later"
                );
                return Ok(Outcome {
                    action: Action::AwaitPolicies {
                        policies,
                        retry_after,
                    },
                    applied: None,
                });
            }
            Err(e) => return Err(e),
        };

        let filters = translate_targets(&source.targets());
        let mut labels = managed_labels();
        labels.extend(source.extra_labels());
        let background = source.background(self.ctx.background_mode);
        let owner = source.controller_reference();
        let target = ObjectKey::namespaced(
            self.ctx.destination_namespace.clone(),
            source.exception_name(),
        );

        let operation = create_or_update(self.exceptions.as_ref(), &target, Some(&owner), move |polex| {
            polex.metadata.labels = labels;
            polex.spec.background = Some(background);
            polex.spec.match_resources = MatchResources {
                any: filters,
                ..MatchResources::default()
            };
            polex.spec.exceptions = exceptions;
        })
        .await?;

        Ok(Outcome {
            action: Action::Requeue(self.ctx.scheduler.next_delay()),
            applied: Some(Applied {
                key: target,
                operation,
            }),
        })
    }
}

/// Keeps the policy cache in step with stored ClusterPolicies.
pub struct ClusterPolicyReconciler {
    policies: Arc<dyn ResourceStore<ClusterPolicy>>,
    exceptions: Arc<dyn ResourceStore<PolicyException>>,
    ctx: Arc<ReconcileContext>,
}

impl ClusterPolicyReconciler {
    pub fn new(
        policies: Arc<dyn ResourceStore<ClusterPolicy>>,
        exceptions: Arc<dyn ResourceStore<PolicyException>>,
        ctx: Arc<ReconcileContext>,
    ) -> Self {
        Self {
            policies,
            exceptions,
            ctx,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        let result = self.apply(key).await;
        settle(Flow::ClusterPolicy, key, result, &self.ctx.metrics)
    }

    async fn apply(&self, key: &ObjectKey) -> Result<Outcome> {
        let action = match self.policies.fetch(key).await {
            Fetched::Failed(e) => return Err(e.into()),
            Fetched::Found(policy) if !policy.metadata.is_being_deleted() => {
                let record = PolicyRecord::from_cluster_policy(&policy);
                debug!(policy = %record.name, rules = record.rules.len(), "caching policy");
                self.ctx.cache.insert(record);
                Action::Requeue(self.ctx.scheduler.next_delay())
            }
            Fetched::Found(_) | Fetched::Absent => {
                if self.ctx.cache.remove(&key.name).is_some() {
                    info!(policy = %key.name, "evicted policy from cache");
                }
                Action::AwaitChange
            }
        };

        let applied = self.sync_bypass().await?;
        Ok(Outcome { action, applied })
    }

    /// Rebuild the bypass exception from every cached policy whose validate
    /// rules cover one of the configured kinds.
    ///
    /// Writes nothing when the bypass is disabled or no policy matches.
    pub async fn sync_bypass(&self) -> Result<Option<Applied>> {
        let bypass = &self.ctx.bypass;
        if !bypass.is_enabled() {
            return Ok(None);
        }

        let records: Vec<Arc<PolicyRecord>> = self
            .ctx
            .cache
            .snapshot()
            .into_iter()
            .filter(|r| r.validates_any(&bypass.exception_kinds))
            .collect();
        if records.is_empty() {
            debug!("no cached policy validates the bypass kinds");
            return Ok(None);
        }

        let exceptions = exceptions_from_records(&records);
        let filter = ResourceFilter {
            subjects: vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: bypass.service_account.clone(),
                namespace: bypass.namespace.clone(),
            }],
            resources: ResourceDescription {
                kinds: bypass.exception_kinds.clone(),
                operations: BYPASS_OPERATIONS.iter().map(|o| o.to_string()).collect(),
                ..ResourceDescription::default()
            },
        };
        let key = ObjectKey::namespaced(bypass.namespace.clone(), BYPASS_EXCEPTION_NAME);

        let operation = create_or_update(self.exceptions.as_ref(), &key, None, move |polex| {
            polex.metadata.labels = managed_labels();
            polex.spec.background = Some(false);
            polex.spec.match_resources = MatchResources {
                all: vec![filter],
                ..MatchResources::default()
            };
            polex.spec.exceptions = exceptions;
        })
        .await?;

        Ok(Some(Applied { key, operation }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giantswarm::{self, Target};
    use crate::kyverno::Rule;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    fn config() -> OperatorConfig {
        OperatorConfig {
            destination_namespace: "policies".to_string(),
            ..OperatorConfig::default()
        }
    }

    fn setup(config: &OperatorConfig) -> (Arc<MemoryStore>, Arc<ReconcileContext>) {
        let ctx = ReconcileContext::from_config(config, Arc::new(PolicyCache::new()));
        (Arc::new(MemoryStore::new()), Arc::new(ctx))
    }

    fn validate_rule(name: &str, kinds: &[&str]) -> Rule {
        Rule {
            name: name.to_string(),
            match_resources: MatchResources {
                any: vec![ResourceFilter {
                    subjects: vec![],
                    resources: ResourceDescription {
                        kinds: kinds.iter().map(|k| k.to_string()).collect(),
                        ..Default::default()
                    },
                }],
                ..Default::default()
            },
            validate: Some(serde_json::json!({ "message": "denied" })),
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ResourceStore<giantswarm::PolicyException> for BrokenStore {
        async fn fetch(&self, _key: &ObjectKey) -> Fetched<giantswarm::PolicyException> {
            Fetched::Failed(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn create(
            &self,
            _object: giantswarm::PolicyException,
        ) -> std::result::Result<giantswarm::PolicyException, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn update(
            &self,
            _object: giantswarm::PolicyException,
        ) -> std::result::Result<giantswarm::PolicyException, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn absent_source_is_a_no_op() {
        let (store, ctx) = setup(&config());
        let flow = ExceptionReconciler::<giantswarm::PolicyException>::new(store.clone(), store.clone(), ctx.clone());

        let outcome = flow.reconcile(&ObjectKey::namespaced("default", "gone")).await.unwrap();
        assert_eq!(outcome, Outcome::idle());
        assert_eq!(store.write_counts().total(), 0);
        assert_eq!(ctx.metrics.total_failures(), 0);
    }

    #[tokio::test]
    async fn cache_miss_requeues_without_counting_failure() {
        let (store, ctx) = setup(&config());
        let key = ObjectKey::namespaced("default", "app");
        store
            .put(giantswarm::PolicyException::new(&key, &["unknown"], vec![]))
            .unwrap();
        let flow = ExceptionReconciler::<giantswarm::PolicyException>::new(store.clone(), store.clone(), ctx.clone());

        let outcome = flow.reconcile(&key).await.unwrap();
        assert!(outcome.action.requeue_after().is_some());
        match outcome.action {
            Action::AwaitPolicies { policies, retry_after } => {
                assert_eq!(policies, vec!["unknown"]);
                assert!(retry_after <= Duration::from_secs(11));
            }
            other => panic!("unexpected action: {:?}", other),
        }
        assert_eq!(ctx.metrics.total_failures(), 0);
        assert_eq!(store.write_counts().total(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_counted_and_propagated() {
        let (store, ctx) = setup(&config());
        let flow = ExceptionReconciler::<giantswarm::PolicyException>::new(
            Arc::new(BrokenStore),
            store,
            ctx.clone(),
        );

        let err = flow.reconcile(&ObjectKey::namespaced("default", "app")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Unavailable(_))));
        assert_eq!(ctx.metrics.failures(Flow::PolicyException), 1);
    }

    #[tokio::test]
    async fn source_being_deleted_is_left_alone() {
        let (store, ctx) = setup(&config());
        ctx.cache.insert(PolicyRecord::new("p", &["r"], &[]));
        let key = ObjectKey::namespaced("default", "app");
        let mut source = giantswarm::PolicyException::new(&key, &["p"], vec![]);
        source.metadata.deletion_timestamp = Some(chrono::Utc::now());
        store.put(source).unwrap();

        let flow = ExceptionReconciler::<giantswarm::PolicyException>::new(store.clone(), store.clone(), ctx);
        let outcome = flow.reconcile(&key).await.unwrap();
        assert_eq!(outcome.action, Action::AwaitChange);
        assert_eq!(store.write_counts().total(), 0);
    }

    #[tokio::test]
    async fn same_named_sources_do_not_take_over_each_other() {
        let (store, ctx) = setup(&config());
        ctx.cache.insert(PolicyRecord::new("p", &["r"], &[]));
        let team_a = ObjectKey::namespaced("team-a", "app");
        let team_b = ObjectKey::namespaced("team-b", "app");
        for key in [&team_a, &team_b] {
            store
                .put(giantswarm::PolicyException::new(
                    key,
                    &["p"],
                    vec![Target::new("Pod", &[key.namespace.as_str()], &["app"])],
                ))
                .unwrap();
        }
        let flow = ExceptionReconciler::<giantswarm::PolicyException>::new(store.clone(), store.clone(), ctx.clone());

        let first = flow.reconcile(&team_a).await.unwrap();
        assert_eq!(first.applied.unwrap().operation, Operation::Created);

        for _ in 0..3 {
            let err = flow.reconcile(&team_b).await.unwrap_err();
            assert!(matches!(err, ReconcileError::Store(StoreError::AlreadyOwned { .. })));
            let again = flow.reconcile(&team_a).await.unwrap();
            assert_eq!(again.applied.unwrap().operation, Operation::Unchanged);
        }

        assert_eq!(store.write_counts(), crate::store::WriteCounts { creates: 1, updates: 0 });
        assert_eq!(ctx.metrics.failures(Flow::PolicyException), 3);
        let written: PolicyException = store
            .get(&ObjectKey::namespaced("policies", "gs-kpo-polex-app-exceptions"))
            .unwrap();
        assert_eq!(
            written.spec.match_resources.any[0].resources.namespaces,
            vec!["team-a"]
        );
    }

    #[tokio::test]
    async fn draft_writes_background_exception() {
        let (store, ctx) = setup(&config());
        ctx.cache.insert(PolicyRecord::new("p", &["r"], &[]));
        let key = ObjectKey::namespaced("default", "proposal");
        store
            .put(giantswarm::PolicyExceptionDraft::new(
                &key,
                &["p"],
                vec![Target::new("Pod", &["default"], &["debug"])],
            ))
            .unwrap();

        let flow = ExceptionReconciler::<giantswarm::PolicyExceptionDraft>::new(store.clone(), store.clone(), ctx);
        let outcome = flow.reconcile(&key).await.unwrap();
        let applied = outcome.applied.unwrap();
        assert_eq!(applied.operation, Operation::Created);
        assert_eq!(applied.key.name, "gs-kpo-draft-proposal-exceptions");

        let written: PolicyException = store.get(&applied.key).unwrap();
        assert_eq!(written.spec.background, Some(true));
        assert_eq!(written.metadata.owner_references[0].kind, "PolicyExceptionDraft");
    }

    #[tokio::test]
    async fn policy_flow_caches_and_evicts() {
        let (store, ctx) = setup(&config());
        let key = ObjectKey::cluster("disallow-privileged");
        store
            .put(ClusterPolicy::new("disallow-privileged", vec![validate_rule("restrict", &["Pod"])]))
            .unwrap();

        let flow = ClusterPolicyReconciler::new(store.clone(), store.clone(), ctx.clone());
        let outcome = flow.reconcile(&key).await.unwrap();
        assert!(matches!(outcome.action, Action::Requeue(_)));
        assert!(ctx.cache.contains("disallow-privileged"));

        store.remove::<ClusterPolicy>(&key);
        let outcome = flow.reconcile(&key).await.unwrap();
        assert_eq!(outcome.action, Action::AwaitChange);
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn bypass_covers_matching_policies_only() {
        let mut config = config();
        config.bypass.exception_kinds = vec!["Deployment".to_string()];
        let (store, ctx) = setup(&config);
        store
            .put(ClusterPolicy::new("restrict-deployments", vec![validate_rule("check", &["Deployment"])]))
            .unwrap();
        store
            .put(ClusterPolicy::new("restrict-services", vec![validate_rule("check", &["Service"])]))
            .unwrap();

        let flow = ClusterPolicyReconciler::new(store.clone(), store.clone(), ctx);
        let outcome = flow.reconcile(&ObjectKey::cluster("restrict-services")).await.unwrap();
        assert!(outcome.applied.is_none());
        assert_eq!(store.write_counts().total(), 0);

        let outcome = flow.reconcile(&ObjectKey::cluster("restrict-deployments")).await.unwrap();
        let applied = outcome.applied.unwrap();
        assert_eq!(applied.key, ObjectKey::namespaced("giantswarm", BYPASS_EXCEPTION_NAME));

        let bypass: PolicyException = store.get(&applied.key).unwrap();
        assert_eq!(bypass.spec.background, Some(false));
        assert_eq!(bypass.spec.exceptions.len(), 1);
        assert_eq!(bypass.spec.exceptions[0].policy_name, "restrict-deployments");
        let filter = &bypass.spec.match_resources.all[0];
        assert_eq!(filter.subjects[0].name, "chart-operator");
        assert_eq!(filter.subjects[0].namespace, "giantswarm");
        assert_eq!(filter.resources.operations, vec!["CREATE", "UPDATE"]);
        assert!(bypass.spec.match_resources.any.is_empty());
    }
}
