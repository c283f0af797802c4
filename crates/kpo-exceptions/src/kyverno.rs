// kyverno.rs - Engine-native object types.
//
// Only the fields the operator reads or writes are modelled. ClusterPolicy
// is read (rule names, autogen status, validate kinds); PolicyException is
// the object every reconciliation flow writes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::meta::{ObjectKey, ObjectMeta, Resource, TypeMeta};

/// Which resources a match filter selects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
}

/// An RBAC subject a filter can be scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// A match filter: namespace/name/kind predicate plus optional subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub resources: ResourceDescription,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ResourceFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ResourceFilter>,
    /// Legacy single-filter form still accepted in policy rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDescription>,
}

impl MatchResources {
    /// Every kind named anywhere in this match block, in first-seen order.
    pub fn kinds(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let legacy = self.resources.iter();
        let filters = self.any.iter().chain(self.all.iter()).map(|f| &f.resources);
        legacy
            .chain(filters)
            .flat_map(|d| d.kinds.iter())
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default, rename = "match")]
    pub match_resources: MatchResources,
    /// Validation body; opaque to the operator, only its presence matters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<serde_json::Value>,
}

impl Rule {
    pub fn has_validate(&self) -> bool {
        self.validate.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicySpec {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Rules the engine derived from authored rules for owner-controller kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutogenStatus {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicyStatus {
    #[serde(default)]
    pub autogen: AutogenStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterPolicySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterPolicyStatus>,
}

impl ClusterPolicy {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            types: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::at(&ObjectKey::cluster(name)),
            spec: ClusterPolicySpec { rules },
            status: None,
        }
    }

    pub fn autogen_rules(&self) -> &[Rule] {
        self.status
            .as_ref()
            .map(|s| s.autogen.rules.as_slice())
            .unwrap_or_default()
    }
}

impl Resource for ClusterPolicy {
    const API_VERSION: &'static str = "kyverno.io/v1";
    const KIND: &'static str = "ClusterPolicy";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// One policy's exempted rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub policy_name: String,
    #[serde(default)]
    pub rule_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExceptionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
    #[serde(default, rename = "match")]
    pub match_resources: MatchResources,
    #[serde(default)]
    pub exceptions: Vec<Exception>,
}

/// The object the policy engine consumes to skip enforcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyException {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PolicyExceptionSpec,
}

impl PolicyException {
    /// Empty exception at `key`, ready to be filled in.
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            types: TypeMeta::of::<Self>(),
            metadata: ObjectMeta::at(key),
            spec: PolicyExceptionSpec::default(),
        }
    }
}

impl Resource for PolicyException {
    const API_VERSION: &'static str = "kyverno.io/v2beta1";
    const KIND: &'static str = "PolicyException";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
