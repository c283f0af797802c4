// source.rs - Source adapters for the exception reconciliation flow.
//
// Every user-facing kind that yields an engine exception implements
// `ExceptionSource`. The flow itself only sees the policy list, the
// targets, the labels to copy and the background choice.

use std::collections::BTreeMap;

use crate::giantswarm::{PolicyException, PolicyExceptionDraft, PolicyManifest, Target, POLICY_LABEL};
use crate::meta::Resource;
use crate::metrics::Flow;

/// A source object that is translated into one engine exception.
pub trait ExceptionSource: Resource {
    /// Prefix of the written exception's name.
    const NAME_PREFIX: &'static str;

    /// Flow whose failure counter this source bumps.
    const FLOW: Flow;

    /// Names of the policies the exception applies to.
    fn policies(&self) -> Vec<String>;

    fn targets(&self) -> Vec<Target>;

    /// Labels copied onto the written exception next to the managed-by marker.
    fn extra_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Background mode for the written exception, given the configured default.
    fn background(&self, default: bool) -> bool {
        default
    }

    /// Name of the engine exception written for this source.
    fn exception_name(&self) -> String {
        format!("{}-{}-exceptions", Self::NAME_PREFIX, self.meta().name)
    }
}

impl ExceptionSource for PolicyException {
    const NAME_PREFIX: &'static str = "gs-kpo-polex";
    const FLOW: Flow = Flow::PolicyException;

    fn policies(&self) -> Vec<String> {
        self.spec.policies.clone()
    }

    fn targets(&self) -> Vec<Target> {
        self.spec.targets.clone()
    }
}

impl ExceptionSource for PolicyExceptionDraft {
    const NAME_PREFIX: &'static str = "gs-kpo-draft";
    const FLOW: Flow = Flow::PolicyExceptionDraft;

    fn policies(&self) -> Vec<String> {
        self.spec.policies.clone()
    }

    fn targets(&self) -> Vec<Target> {
        self.spec.targets.clone()
    }

    // Drafts are report-only.
    fn background(&self, _default: bool) -> bool {
        true
    }
}

impl ExceptionSource for PolicyManifest {
    const NAME_PREFIX: &'static str = "gs-kpo";
    const FLOW: Flow = Flow::PolicyManifest;

    /// A manifest is named after the single policy it manages.
    fn policies(&self) -> Vec<String> {
        vec![self.metadata.name.clone()]
    }

    fn targets(&self) -> Vec<Target> {
        self.all_targets()
    }

    fn extra_labels(&self) -> BTreeMap<String, String> {
        self.metadata
            .labels
            .get_key_value(POLICY_LABEL)
            .map(|(k, v)| BTreeMap::from([(k.clone(), v.clone())]))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::giantswarm::PolicyManifestSpec;
    use crate::meta::ObjectKey;

    #[test]
    fn exception_names_use_kind_prefix() {
        let key = ObjectKey::namespaced("default", "app");
        let polex = PolicyException::new(&key, &["p"], vec![]);
        let draft = PolicyExceptionDraft::new(&key, &["p"], vec![]);
        let manifest = PolicyManifest::new(&ObjectKey::cluster("disallow-privileged"), Default::default());

        assert_eq!(polex.exception_name(), "gs-kpo-polex-app-exceptions");
        assert_eq!(draft.exception_name(), "gs-kpo-draft-app-exceptions");
        assert_eq!(manifest.exception_name(), "gs-kpo-disallow-privileged-exceptions");
    }

    #[test]
    fn draft_is_always_background() {
        let draft = PolicyExceptionDraft::new(&ObjectKey::namespaced("default", "d"), &[], vec![]);
        assert!(draft.background(false));
        let polex = PolicyException::new(&ObjectKey::namespaced("default", "p"), &[], vec![]);
        assert!(!polex.background(false));
    }

    #[test]
    fn manifest_copies_policy_label_only() {
        let mut manifest = PolicyManifest::new(
            &ObjectKey::cluster("disallow-privileged"),
            PolicyManifestSpec {
                exceptions: vec![Target::new("Deployment", &["default"], &["app"])],
                automated_exceptions: vec![Target::new("Pod", &["kube-system"], &["cni"])],
                ..Default::default()
            },
        );
        manifest
            .metadata
            .labels
            .insert(POLICY_LABEL.to_string(), "disallow-privileged".to_string());
        manifest.metadata.labels.insert("team".to_string(), "x".to_string());

        assert_eq!(manifest.policies(), vec!["disallow-privileged"]);
        assert_eq!(manifest.targets().len(), 2);
        assert_eq!(
            manifest.extra_labels(),
            BTreeMap::from([(POLICY_LABEL.to_string(), "disallow-privileged".to_string())])
        );
    }
}
