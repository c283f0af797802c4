// target.rs - Translate abstract targets into engine match filters.

use crate::giantswarm::Target;
use crate::kinds::expand_kinds;
use crate::kyverno::{ResourceDescription, ResourceFilter};

/// Suffix that turns a workload name into a prefix match.
pub const NAME_WILDCARD: char = '*';

/// Append [`NAME_WILDCARD`] unless the pattern already ends with it.
///
/// Idempotent: `normalize_name_pattern(&normalize_name_pattern(x)) == normalize_name_pattern(x)`.
pub fn normalize_name_pattern(pattern: &str) -> String {
    if pattern.ends_with(NAME_WILDCARD) {
        pattern.to_string()
    } else {
        format!("{}{}", pattern, NAME_WILDCARD)
    }
}

/// Translate a single target. Never fails; missing fields become empty constraints.
pub fn translate_target(target: &Target) -> ResourceFilter {
    // A blank pattern would normalize to a bare "*" and match every name.
    let names = target
        .names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| normalize_name_pattern(n))
        .collect();

    ResourceFilter {
        subjects: Vec::new(),
        resources: ResourceDescription {
            kinds: expand_kinds(&target.kind),
            names,
            namespaces: target.namespaces.clone(),
            operations: Vec::new(),
        },
    }
}

/// Translate targets in order, one filter per target.
pub fn translate_targets(targets: &[Target]) -> Vec<ResourceFilter> {
    targets.iter().map(translate_target).collect()
}
