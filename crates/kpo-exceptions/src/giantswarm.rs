// giantswarm.rs - User-facing exception declarations.
//
// These are the source objects the flows translate: PolicyException and
// PolicyExceptionDraft (policy list + targets) and PolicyManifest (one
// policy with its exception targets).

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectKey, ObjectMeta, Resource, TypeMeta};

pub const API_VERSION: &str = "policy.giantswarm.io/v1alpha1";

/// Label on a PolicyManifest naming the policy it manages.
pub const POLICY_LABEL: &str = "policy.giantswarm.io/policy";

/// Abstract workload selector: one kind, any of the namespaces, any of the names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
}

impl Target {
    pub fn new(kind: &str, namespaces: &[&str], names: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyExceptionSpec {
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyException {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicyExceptionSpec,
}

impl PolicyException {
    pub fn new(key: &ObjectKey, policies: &[&str], targets: Vec<Target>) -> Self {
        Self {
            types: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::at(key),
            spec: PolicyExceptionSpec {
                policies: policies.iter().map(|p| p.to_string()).collect(),
                targets,
            },
        }
    }
}

impl Resource for PolicyException {
    const API_VERSION: &'static str = API_VERSION;
    const KIND: &'static str = "PolicyException";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// A proposed exception; same shape as [`PolicyException`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyExceptionDraft {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicyExceptionSpec,
}

impl PolicyExceptionDraft {
    pub fn new(key: &ObjectKey, policies: &[&str], targets: Vec<Target>) -> Self {
        Self {
            types: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::at(key),
            spec: PolicyExceptionSpec {
                policies: policies.iter().map(|p| p.to_string()).collect(),
                targets,
            },
        }
    }
}

impl Resource for PolicyExceptionDraft {
    const API_VERSION: &'static str = API_VERSION;
    const KIND: &'static str = "PolicyExceptionDraft";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyManifestSpec {
    #[serde(default)]
    pub exceptions: Vec<Target>,
    #[serde(default)]
    pub automated_exceptions: Vec<Target>,
}

/// Per-policy manifest. Its name is the name of the policy it manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyManifest {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicyManifestSpec,
}

impl PolicyManifest {
    pub fn new(key: &ObjectKey, spec: PolicyManifestSpec) -> Self {
        Self {
            types: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::at(key),
            spec,
        }
    }

    /// Hand-written exceptions first, then the automated ones.
    pub fn all_targets(&self) -> Vec<Target> {
        self.spec
            .exceptions
            .iter()
            .chain(self.spec.automated_exceptions.iter())
            .cloned()
            .collect()
    }
}

impl Resource for PolicyManifest {
    const API_VERSION: &'static str = API_VERSION;
    const KIND: &'static str = "PolicyManifest";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
