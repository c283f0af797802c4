// reconcile.rs - Run the flows against a persistent state directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kpo_exceptions::{FileStore, OperatorConfig};

use super::driver;
use super::manifests;

pub async fn execute(
    config: &OperatorConfig,
    manifest_dir: &Path,
    state_dir: &Path,
) -> anyhow::Result<()> {
    let sources = manifests::load_dir(manifest_dir)?;
    let store = FileStore::new(state_dir)
        .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;
    tracing::info!(
        manifests = sources.len(),
        state = %state_dir.display(),
        "reconciling"
    );

    let report = driver::run(Arc::new(store), config, sources).await?;
    report.print_summary();

    let failures = report.metrics.total_failures();
    if failures > 0 {
        anyhow::bail!("{} reconciliation(s) failed", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpo_exceptions::kyverno::PolicyException;
    use kpo_exceptions::{ObjectKey, Resource};
    use tempfile::tempdir;

    const SOURCES: &str = r#"
apiVersion: kyverno.io/v1
kind: ClusterPolicy
metadata:
  name: disallow-privileged
spec:
  rules:
    - name: restrict-privileged
---
apiVersion: policy.giantswarm.io/v1alpha1
kind: PolicyException
metadata:
  name: app-1
  namespace: default
spec:
  policies: [disallow-privileged]
  targets:
    - kind: Deployment
      namespaces: [default]
      names: [app-1]
"#;

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let manifests = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(manifests.path().join("sources.yaml"), SOURCES).unwrap();
        let config = OperatorConfig {
            destination_namespace: "policy-exceptions".to_string(),
            ..OperatorConfig::default()
        };

        execute(&config, manifests.path(), state.path()).await.unwrap();
        let written = state
            .path()
            .join("policyexception.kyverno.io")
            .join("policy-exceptions")
            .join("gs-kpo-polex-app-1-exceptions.json");
        let first = std::fs::read_to_string(&written).unwrap();

        execute(&config, manifests.path(), state.path()).await.unwrap();
        let second = std::fs::read_to_string(&written).unwrap();
        assert_eq!(first, second);

        let store = FileStore::new(state.path()).unwrap();
        let exceptions: Vec<PolicyException> = store.list().unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].key(),
            ObjectKey::namespaced("policy-exceptions", "gs-kpo-polex-app-1-exceptions")
        );
    }
}
