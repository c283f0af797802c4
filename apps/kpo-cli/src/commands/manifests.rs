// manifests.rs - Load source objects from a directory of YAML manifests.
//
// Every `*.yaml` / `*.yml` file may hold several documents. Documents are
// dispatched on their `kind`; kinds the operator does not watch are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use kpo_exceptions::giantswarm::{PolicyException, PolicyExceptionDraft, PolicyManifest};
use kpo_exceptions::kyverno::ClusterPolicy;
use kpo_exceptions::Resource;

/// Source objects found in a manifest directory, in file order.
#[derive(Debug, Default)]
pub struct Manifests {
    pub policies: Vec<ClusterPolicy>,
    pub exceptions: Vec<PolicyException>,
    pub drafts: Vec<PolicyExceptionDraft>,
    pub manifests: Vec<PolicyManifest>,
}

impl Manifests {
    pub fn len(&self) -> usize {
        self.policies.len() + self.exceptions.len() + self.drafts.len() + self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read every manifest file under `dir` (not recursive), sorted by file name.
pub fn load_dir(dir: &Path) -> anyhow::Result<Manifests> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read manifest directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut manifests = Manifests::default();
    for file in &files {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        parse_documents(&content, &mut manifests)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
    }
    Ok(manifests)
}

fn is<K: Resource>(api_version: &str, kind: &str) -> bool {
    api_version == K::API_VERSION && kind == K::KIND
}

/// Parse a multi-document YAML string into `out`.
pub fn parse_documents(content: &str, out: &mut Manifests) -> anyhow::Result<()> {
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }

        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if is::<ClusterPolicy>(&api_version, &kind) {
            out.policies.push(serde_yaml::from_value(value)?);
        } else if is::<PolicyException>(&api_version, &kind) {
            out.exceptions.push(serde_yaml::from_value(value)?);
        } else if is::<PolicyExceptionDraft>(&api_version, &kind) {
            out.drafts.push(serde_yaml::from_value(value)?);
        } else if is::<PolicyManifest>(&api_version, &kind) {
            out.manifests.push(serde_yaml::from_value(value)?);
        } else {
            tracing::warn!(api_version = %api_version, kind = %kind, "skipping unwatched manifest");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: unrelated
---
"#;

    #[test]
    fn documents_are_dispatched_by_kind() {
        let mut manifests = Manifests::default();
        parse_documents(SOURCES, &mut manifests).unwrap();

        assert_eq!(manifests.policies.len(), 1);
        assert_eq!(manifests.exceptions.len(), 1);
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests.exceptions[0].spec.targets[0].kind, "Deployment");
    }

    #[test]
    fn only_yaml_files_are_read() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sources.yaml"), SOURCES).unwrap();
        fs::write(dir.path().join("notes.txt"), "kind: PolicyException").unwrap();

        let manifests = load_dir(dir.path()).unwrap();
        assert_eq!(manifests.len(), 2);
    }

    #[test]
    fn kyverno_exception_kind_is_not_a_source() {
        let mut manifests = Manifests::default();
        parse_documents(
            "apiVersion: kyverno.io/v2beta1\nkind: PolicyException\nmetadata:\n  name: x\n",
            &mut manifests,
        )
        .unwrap();
        assert!(manifests.is_empty());
    }
}
