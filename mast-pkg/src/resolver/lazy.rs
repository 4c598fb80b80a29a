//! Helpers for the depth-first search in [`super`].
//!
//! The backtracking search is expressed as short-circuiting async recursion rather than a
//! materialized `Vec<(Assignment, ConstraintSet)>`: a candidate that fails to produce a solution
//! is simply never explored further, which is the operational meaning of "lazy sequence, take the
//! first element" once the sequence is this small. Where the underlying data is already in hand
//! (a container's already-fetched version list), the laziness is literal: callers iterate
//! `container.versions()` and stop at the first version whose subtree succeeds.

use std::collections::HashMap;

use crate::container::BoundVersion;
use crate::dependency::Dependency;

use super::Assignment;

/// Merge two partial assignments, failing if any identifier is bound incompatibly in both.
///
/// Two bindings for the same identifier are compatible only if they're identical — by
/// construction every assignment for one identifier originates from exactly one
/// `resolve_subtree` call, so a clash here means two different subtrees both tried to bind the
/// same identifier, which the merge-constraint step should already have to prevented by the time
/// this runs.
pub fn merge_assignments(a: &Assignment, b: &Assignment) -> Option<Assignment> {
    let mut merged = a.clone();
    for (identifier, (container, bound)) in b {
        match merged.get(identifier) {
            Some((_, existing_bound)) if existing_bound != bound => return None,
            Some(_) => {}
            None => {
                merged.insert(identifier.clone(), (container.clone(), bound.clone()));
            }
        }
    }
    Some(merged)
}

/// Whether an already-bound version still satisfies a (possibly narrower) requirement.
pub fn bound_satisfies(bound: &BoundVersion, requirement: &crate::constraint::Requirement) -> bool {
    use crate::constraint::Requirement;
    match (bound, requirement) {
        // `Unversioned` imposes no constraint beyond presence, matching `Requirement::merge`'s
        // "Unversioned wins over both" rule: whatever a sibling subtree already bound this
        // identifier to, an Unversioned requirement arriving afterward doesn't narrow it further.
        (_, Requirement::Unversioned) => true,
        (BoundVersion::Revision(r), Requirement::Revision(r2)) => r == r2,
        (BoundVersion::Version(v), Requirement::VersionSet(spec)) => spec.accepts(*v),
        // A binding of one kind against a requirement of a different kind only happens if the
        // constraint-merge step already rejected the combination, so by the time we get here this
        // is always a mismatch.
        _ => false,
    }
}

/// Flatten a resolved assignment map into the manifest-order-agnostic `(identifier, bound)` list
/// `Resolution::Success` reports.
pub fn flatten(assignment: Assignment) -> Vec<(Dependency, BoundVersion)> {
    let map: HashMap<Dependency, BoundVersion> = assignment
        .into_iter()
        .map(|(id, (_, bound))| (id, bound))
        .collect();
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
    entries
}
