//! The constraint lattice the resolver narrows as it walks the dependency graph.
//!
//! A [`ConstraintSet`] maps each dependency identifier to the single [`Requirement`] every
//! container considered so far has agreed on. Merging two requirements for the same identifier
//! either narrows the set further or proves it empty, at which point the resolver backtracks.

use std::collections::BTreeMap;
use std::fmt;

use crate::dependency::Dependency;
use crate::version::VersionSpecifier;

/// What a single identifier is currently constrained to.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Requirement {
    /// Constrained to a (possibly unbounded) set of semantic versions.
    VersionSet(VersionSpecifier),
    /// Pinned to an exact, non-semantic revision (a branch, tag, or commit).
    Revision(String),
    /// No constraint at all beyond "this dependency must be present": its container is not
    /// versioned.
    Unversioned,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::VersionSet(spec) => write!(f, "{spec}"),
            Requirement::Revision(r) => write!(f, "revision {r:?}"),
            Requirement::Unversioned => write!(f, "unversioned"),
        }
    }
}

impl Requirement {
    /// Merge two requirements on the same identifier, returning `None` when they're mutually
    /// exclusive (the distinguished empty set).
    ///
    /// `Unversioned` wins over both `VersionSet` and `Revision`: an unversioned container carries
    /// no version information to conflict with a revision pin in the first place, so the pin
    /// simply selects which checkout is fetched.
    pub fn merge(&self, other: &Requirement) -> Option<Requirement> {
        use Requirement::*;
        match (self, other) {
            (VersionSet(a), VersionSet(b)) => a.intersect(b).map(VersionSet),
            (Revision(a), Revision(b)) => {
                if a == b {
                    Some(Revision(a.clone()))
                } else {
                    None
                }
            }
            (Unversioned, Unversioned) => Some(Unversioned),
            (Unversioned, VersionSet(_)) | (VersionSet(_), Unversioned) => Some(Unversioned),
            (Unversioned, Revision(_)) | (Revision(_), Unversioned) => Some(Unversioned),
            (VersionSet(_), Revision(r)) | (Revision(r), VersionSet(_)) => Some(Revision(r.clone())),
        }
    }
}

/// An immutable, narrowing map from dependency identifier to its current [`Requirement`].
///
/// By construction no entry is ever the empty set: [`ConstraintSet::merge`] returns `None` for
/// the whole operation the instant any single identifier's merge would produce one, rather than
/// inserting it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConstraintSet {
    requirements: BTreeMap<Dependency, Requirement>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dep: &Dependency) -> Option<&Requirement> {
        self.requirements.get(dep)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dependency, &Requirement)> {
        self.requirements.iter()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Dependency> {
        self.requirements.keys()
    }

    /// Returns a new `ConstraintSet` with `dep` constrained by `req`, merged against any existing
    /// requirement for `dep`. Returns `None` if the merge empties the set.
    pub fn with_constraint(&self, dep: Dependency, req: Requirement) -> Option<ConstraintSet> {
        let merged = match self.requirements.get(&dep) {
            Some(existing) => existing.merge(&req)?,
            None => req,
        };
        let mut next = self.clone();
        next.requirements.insert(dep, merged);
        Some(next)
    }

    /// Merge `other` into `self`, narrowing every shared identifier. Returns `None` if any
    /// identifier's merge empties.
    pub fn merge(&self, other: &ConstraintSet) -> Option<ConstraintSet> {
        let mut result = self.clone();
        for (dep, req) in other.iter() {
            result = result.with_constraint(dep.clone(), req.clone())?;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SemanticVersion;

    fn dep(name: &str) -> Dependency {
        Dependency::GitHub {
            server: "github.com".into(),
            owner: "o".into(),
            repo: name.into(),
        }
    }

    #[test]
    fn version_sets_intersect() {
        let a = Requirement::VersionSet(VersionSpecifier::AtLeast(SemanticVersion::new(1, 0, 0)));
        let b = Requirement::VersionSet(VersionSpecifier::CompatibleWith(SemanticVersion::new(
            1, 2, 0,
        )));
        let merged = a.merge(&b).unwrap();
        assert_eq!(
            merged,
            Requirement::VersionSet(VersionSpecifier::CompatibleWith(SemanticVersion::new(
                1, 2, 0
            )))
        );
    }

    #[test]
    fn unversioned_wins_over_version_set_and_revision() {
        let vs = Requirement::VersionSet(VersionSpecifier::Any);
        let rev = Requirement::Revision("deadbeef".into());
        assert_eq!(
            Requirement::Unversioned.merge(&vs),
            Some(Requirement::Unversioned)
        );
        assert_eq!(
            Requirement::Unversioned.merge(&rev),
            Some(Requirement::Unversioned)
        );
    }

    #[test]
    fn conflicting_revisions_are_empty() {
        let a = Requirement::Revision("abc".into());
        let b = Requirement::Revision("def".into());
        assert_eq!(a.merge(&b), None);
    }

    #[test]
    fn version_set_and_revision_prefer_revision() {
        let vs = Requirement::VersionSet(VersionSpecifier::AtLeast(SemanticVersion::new(1, 0, 0)));
        let rev = Requirement::Revision("abc".into());
        assert_eq!(vs.merge(&rev), Some(Requirement::Revision("abc".into())));
    }

    #[test]
    fn constraint_set_merges_distinct_identifiers_independently() {
        let set = ConstraintSet::new();
        let set = set
            .with_constraint(
                dep("A"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 0, 0))),
            )
            .unwrap();
        let set = set
            .with_constraint(dep("B"), Requirement::Revision("main".into()))
            .unwrap();
        assert_eq!(set.get(&dep("A")).unwrap().to_string(), "== 1.0.0");
        assert_eq!(set.get(&dep("B")).unwrap().to_string(), "revision \"main\"");
    }

    #[test]
    fn constraint_set_rejects_conflicting_merge_on_same_identifier() {
        let set = ConstraintSet::new()
            .with_constraint(
                dep("A"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 0, 0))),
            )
            .unwrap();
        let conflicting = set.with_constraint(
            dep("A"),
            Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(2, 0, 0))),
        );
        assert!(conflicting.is_none());
    }
}
