// meta.rs - Object identity and metadata shared by every stored kind.
//
// Mirrors the subset of Kubernetes object metadata the operator relies on:
// identity (namespace + name), the optimistic-concurrency version token,
// labels, owner references and the deletion marker.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Label stamped on every object this operator writes.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "kyverno-policy-operator";

/// `apiVersion` + `kind` header carried by every serialized object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

impl TypeMeta {
    /// Header for resource kind `K`.
    pub fn of<K: Resource>() -> Self {
        Self {
            api_version: K::API_VERSION.to_string(),
            kind: K::KIND.to_string(),
        }
    }
}

/// Back-link from a derived object to the object that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    pub fn is_controller(&self) -> bool {
        self.controller.unwrap_or(false)
    }

    /// Whether both references point at the same object. API versions may
    /// differ within a group; uids are compared only when both are known.
    pub fn refers_to_same(&self, other: &OwnerReference) -> bool {
        api_group(&self.api_version) == api_group(&other.api_version)
            && self.kind == other.kind
            && self.name == other.name
            && (self.uid.is_empty() || other.uid.is_empty() || self.uid == other.uid)
    }
}

fn api_group(api_version: &str) -> &str {
    api_version
        .rsplit_once('/')
        .map(|(group, _)| group)
        .unwrap_or("")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Version token; an update must carry the token it was read with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a new object at `key`.
    pub fn at(key: &ObjectKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            ..Self::default()
        }
    }

    /// Set `owner` as the controlling owner.
    ///
    /// Fails with the current controller when another object already
    /// controls this one. Non-controller owner references are left alone.
    pub fn set_controller_reference(&mut self, owner: OwnerReference) -> Result<(), OwnerReference> {
        match self.owner_references.iter_mut().find(|r| r.is_controller()) {
            Some(current) if !current.refers_to_same(&owner) => Err(current.clone()),
            Some(current) => {
                *current = owner;
                Ok(())
            }
            None => {
                self.owner_references.push(owner);
                Ok(())
            }
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Identity of a stored object. Cluster-scoped objects have an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::namespaced(String::new(), name)
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cluster_scoped() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A kind of object the store can hold.
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const API_VERSION: &'static str;
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Lower-case kind qualified by API group, e.g. `policyexception.kyverno.io`.
    /// Unique across kinds that share a name in different groups.
    fn qualified_kind() -> String {
        let group = Self::API_VERSION
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("core");
        format!("{}.{}", Self::KIND.to_lowercase(), group)
    }

    fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::namespaced(meta.namespace.clone(), meta.name.clone())
    }

    /// Owner reference pointing at this object, marked as controller.
    fn controller_reference(&self) -> OwnerReference {
        let meta = self.meta();
        OwnerReference {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            name: meta.name.clone(),
            uid: meta.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Labels every written exception starts from.
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}
