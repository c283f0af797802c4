// kinds.rs - Kind expansion for exception match clauses.
//
// An exception written against a controller kind must also cover the
// workloads that controller creates, otherwise admission of the owned
// ReplicaSet/Job/Pod is still blocked.

/// The pod-equivalent kind every workload ends up creating.
pub const BASE_KIND: &str = "Pod";

/// Controller kinds and the intermediate kind they own.
const OWNED_KINDS: &[(&str, &str)] = &[("Deployment", "ReplicaSet"), ("CronJob", "Job")];

/// The kind a controller creates directly, if it is one of the known controllers.
fn owned_kind(kind: &str) -> Option<&'static str> {
    OWNED_KINDS
        .iter()
        .find(|(controller, _)| *controller == kind)
        .map(|(_, owned)| *owned)
}

/// Expand `kind` into every kind an exception for it must cover.
///
/// The input kind comes first, then its owned kind (if any), then
/// [`BASE_KIND`] unless the input already is the base kind. A blank kind
/// carries no constraint and expands to nothing.
pub fn expand_kinds(kind: &str) -> Vec<String> {
    let kind = kind.trim();
    if kind.is_empty() {
        return Vec::new();
    }

    let mut kinds = vec![kind.to_string()];
    if let Some(owned) = owned_kind(kind) {
        kinds.push(owned.to_string());
    }
    if !kinds.iter().any(|k| k == BASE_KIND) {
        kinds.push(BASE_KIND.to_string());
    }
    kinds
}
