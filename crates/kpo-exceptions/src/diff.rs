// diff.rs - Order-independent comparison of exception lists.
//
// Two lists are converged when they map the same policy names to the same
// rule-name sets. Entry order and rule order carry no meaning to the
// engine, so reordering alone must never cause a write.

use std::collections::{BTreeMap, BTreeSet};

use crate::kyverno::Exception;

type RuleIndex<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

fn index(exceptions: &[Exception]) -> RuleIndex<'_> {
    let mut index = RuleIndex::new();
    for exception in exceptions {
        index
            .entry(exception.policy_name.as_str())
            .or_default()
            .extend(exception.rule_names.iter().map(String::as_str));
    }
    index
}

/// True when `observed` and `desired` are equal modulo ordering.
pub fn exceptions_converged(observed: &[Exception], desired: &[Exception]) -> bool {
    if observed.len() != desired.len() {
        return false;
    }

    let wanted = index(desired);
    let found = index(observed);
    // Collapsed duplicate names show up as a shorter index.
    if wanted.len() != found.len() {
        return false;
    }

    found
        .iter()
        .all(|(policy, rules)| wanted.get(policy).is_some_and(|want| want == rules))
}
