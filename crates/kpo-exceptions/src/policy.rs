// policy.rs - Cached view of a ClusterPolicy.
//
// A PolicyRecord keeps only what exception building needs: the rule names
// a policy owns and the kinds its validate rules target. Records are built
// once per observed policy update and never mutated afterwards.

use std::collections::{BTreeSet, HashSet};

use crate::kyverno::ClusterPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub name: String,
    /// Rule names as authored, in policy order.
    pub rules: Vec<String>,
    /// Rule names the engine generated for owner-controller kinds.
    pub autogen_rules: Vec<String>,
    /// Kinds matched by the policy's validate rules.
    pub validate_kinds: BTreeSet<String>,
}

impl PolicyRecord {
    pub fn new(name: impl Into<String>, rules: &[&str], autogen_rules: &[&str]) -> Self {
        Self {
            name: name.into(),
            rules: rules.iter().map(|r| r.to_string()).collect(),
            autogen_rules: autogen_rules.iter().map(|r| r.to_string()).collect(),
            validate_kinds: BTreeSet::new(),
        }
    }

    pub fn from_cluster_policy(policy: &ClusterPolicy) -> Self {
        let validate_kinds = policy
            .spec
            .rules
            .iter()
            .filter(|r| r.has_validate())
            .flat_map(|r| r.match_resources.kinds())
            .collect();

        Self {
            name: policy.metadata.name.clone(),
            rules: policy.spec.rules.iter().map(|r| r.name.clone()).collect(),
            autogen_rules: policy.autogen_rules().iter().map(|r| r.name.clone()).collect(),
            validate_kinds,
        }
    }

    /// Every rule an exception for this policy must name: authored rules
    /// followed by autogenerated ones, each once.
    pub fn rule_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .chain(self.autogen_rules.iter())
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect()
    }

    /// Whether any validate rule targets one of `kinds`.
    pub fn validates_any(&self, kinds: &[String]) -> bool {
        kinds.iter().any(|k| self.validate_kinds.contains(k))
    }
}
