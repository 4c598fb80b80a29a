//! Semantic version parsing/ordering and the version-set algebra used by the resolver.
//!
//! A small closed algebra over `Any`/`AtLeast`/`CompatibleWith`/`Exactly`/`GitReference`, with
//! intersection defined for every pair.

use std::{cmp::Ordering, fmt};
use thiserror::Error;

/// A parsed `major.minor.patch` triple with total order.
///
/// Parsed from `X[.Y[.Z]]`, optionally prefixed with `v`/`V`. Missing minor/patch default to
/// zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid semantic version component {component:?} in {input:?}")]
pub struct VersionParseError {
    pub input: String,
    pub component: String,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `X[.Y[.Z]]`, optionally prefixed with `v`/`V`.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let trimmed = s.strip_prefix(['v', 'V']).unwrap_or(s);
        let mut parts = trimmed.split('.');
        let parse_component = |part: Option<&str>| -> Result<u64, VersionParseError> {
            let part = part.unwrap_or("0");
            part.parse::<u64>().map_err(|_| VersionParseError {
                input: s.to_string(),
                component: part.to_string(),
            })
        };
        let major = parse_component(parts.next())?;
        let minor = match parts.next() {
            Some(p) => parse_component(Some(p))?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(Some(p))?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(VersionParseError {
                input: s.to_string(),
                component: trimmed.to_string(),
            });
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// An opaque, free-form commit identifier: a branch name, tag, or 40-character commit hash.
///
/// Equality is plain string equality. If the string happens to parse as a semantic version (e.g.
/// a tag like `2.3.1`), [`PinnedVersion::semantic_version`] exposes it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PinnedVersion(String);

impl PinnedVersion {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts a [`SemanticVersion`] from this pinned version, if it parses as one.
    pub fn semantic_version(&self) -> Option<SemanticVersion> {
        SemanticVersion::parse(&self.0).ok()
    }
}

impl fmt::Display for PinnedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PinnedVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PinnedVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A declarative set of acceptable [`PinnedVersion`]s, as written in a manifest entry or derived
/// from transitive requirements.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum VersionSpecifier {
    /// Accepts any version.
    Any,
    /// Accepts `v >= sem`.
    AtLeast(SemanticVersion),
    /// Accepts any version with the same major component as `sem`, and `v >= sem` (`~>`).
    CompatibleWith(SemanticVersion),
    /// Accepts exactly `sem`.
    Exactly(SemanticVersion),
    /// Accepts only the pinned version matching this exact git reference string.
    GitReference(String),
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpecifier::Any => write!(f, "any"),
            VersionSpecifier::AtLeast(v) => write!(f, ">= {v}"),
            VersionSpecifier::CompatibleWith(v) => write!(f, "~> {v}"),
            VersionSpecifier::Exactly(v) => write!(f, "== {v}"),
            VersionSpecifier::GitReference(s) => write!(f, "{s}"),
        }
    }
}

impl VersionSpecifier {
    /// Whether this specifier accepts the given semantic version.
    pub fn accepts(&self, v: SemanticVersion) -> bool {
        match self {
            VersionSpecifier::Any => true,
            VersionSpecifier::AtLeast(min) => v >= *min,
            VersionSpecifier::CompatibleWith(min) => v.major == min.major && v >= *min,
            VersionSpecifier::Exactly(exact) => v == *exact,
            VersionSpecifier::GitReference(_) => false,
        }
    }

    /// Whether this specifier accepts the given pinned version.
    ///
    /// Non-parseable pinned versions satisfy only `Any` and a matching `GitReference`.
    pub fn accepts_pinned(&self, pinned: &PinnedVersion) -> bool {
        match pinned.semantic_version() {
            Some(sem) => self.accepts(sem),
            None => match self {
                VersionSpecifier::Any => true,
                VersionSpecifier::GitReference(s) => s == pinned.as_str(),
                _ => false,
            },
        }
    }

    /// Intersects two specifiers, returning `None` for the distinguished empty set.
    pub fn intersect(&self, other: &VersionSpecifier) -> Option<VersionSpecifier> {
        use VersionSpecifier::*;
        match (self, other) {
            (Any, x) | (x, Any) => Some(x.clone()),
            (Exactly(v), x) | (x, Exactly(v)) => {
                if x.accepts(*v) {
                    Some(Exactly(*v))
                } else {
                    None
                }
            }
            (AtLeast(a), AtLeast(b)) => Some(AtLeast(max_version(*a, *b))),
            (CompatibleWith(a), CompatibleWith(b)) => {
                if a.major == b.major {
                    Some(CompatibleWith(max_version(*a, *b)))
                } else {
                    None
                }
            }
            (AtLeast(a), CompatibleWith(b)) | (CompatibleWith(b), AtLeast(a)) => {
                if a.major <= b.major {
                    Some(CompatibleWith(max_version(*a, *b)))
                } else {
                    None
                }
            }
            (GitReference(a), GitReference(b)) => {
                if a == b {
                    Some(GitReference(a.clone()))
                } else {
                    None
                }
            }
            (GitReference(_), _) | (_, GitReference(_)) => None,
        }
    }
}

fn max_version(a: SemanticVersion, b: SemanticVersion) -> SemanticVersion {
    if a.cmp(&b) == Ordering::Less {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap()
    }

    #[test]
    fn parses_with_defaults() {
        assert_eq!(v("1"), SemanticVersion::new(1, 0, 0));
        assert_eq!(v("1.2"), SemanticVersion::new(1, 2, 0));
        assert_eq!(v("v1.2.3"), SemanticVersion::new(1, 2, 3));
        assert!(SemanticVersion::parse("1.x").is_err());
    }

    #[test]
    fn ordering_is_total() {
        assert!(v("1.2.3") < v("1.10.0"));
        assert!(v("2.0.0") > v("1.99.99"));
    }

    #[test]
    fn exactly_accepts_only_itself() {
        let s = VersionSpecifier::Exactly(v("1.2.3"));
        assert!(s.accepts(v("1.2.3")));
        assert!(!s.accepts(v("1.2.4")));
    }

    #[test]
    fn compatible_with_respects_major() {
        let s = VersionSpecifier::CompatibleWith(v("1.2.0"));
        assert!(s.accepts(v("1.2.0")));
        assert!(s.accepts(v("1.9.9")));
        assert!(!s.accepts(v("2.0.0")));
        assert!(!s.accepts(v("1.1.9")));
    }

    #[test]
    fn intersect_any_is_identity() {
        let a = VersionSpecifier::AtLeast(v("1.0.0"));
        assert_eq!(a.intersect(&VersionSpecifier::Any), Some(a.clone()));
        assert_eq!(VersionSpecifier::Any.intersect(&a), Some(a));
    }

    #[test]
    fn intersect_at_least_takes_max() {
        let a = VersionSpecifier::AtLeast(v("1.0.0"));
        let b = VersionSpecifier::AtLeast(v("2.0.0"));
        assert_eq!(a.intersect(&b), Some(VersionSpecifier::AtLeast(v("2.0.0"))));
    }

    #[test]
    fn intersect_compatible_with_different_major_is_empty() {
        let a = VersionSpecifier::CompatibleWith(v("1.0.0"));
        let b = VersionSpecifier::CompatibleWith(v("2.0.0"));
        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn intersect_at_least_and_compatible_with() {
        let a = VersionSpecifier::AtLeast(v("1.5.0"));
        let b = VersionSpecifier::CompatibleWith(v("1.0.0"));
        assert_eq!(
            a.intersect(&b),
            Some(VersionSpecifier::CompatibleWith(v("1.5.0")))
        );

        let c = VersionSpecifier::AtLeast(v("3.0.0"));
        assert_eq!(c.intersect(&b), None);
    }

    #[test]
    fn intersect_git_reference_only_matches_itself_or_any() {
        let a = VersionSpecifier::GitReference("feature/foo".into());
        let b = VersionSpecifier::GitReference("feature/bar".into());
        assert_eq!(a.intersect(&b), None);
        assert_eq!(a.intersect(&a.clone()), Some(a.clone()));
        assert_eq!(a.intersect(&VersionSpecifier::Any), Some(a.clone()));
        assert_eq!(
            a.intersect(&VersionSpecifier::AtLeast(v("1.0.0"))),
            None
        );
    }

    #[test]
    fn intersect_is_commutative() {
        let specs = vec![
            VersionSpecifier::Any,
            VersionSpecifier::AtLeast(v("1.0.0")),
            VersionSpecifier::CompatibleWith(v("1.2.0")),
            VersionSpecifier::Exactly(v("1.2.3")),
            VersionSpecifier::GitReference("main".into()),
        ];
        for a in &specs {
            for b in &specs {
                assert_eq!(a.intersect(b), b.intersect(a), "a={a:?} b={b:?}");
            }
        }
    }

    #[test]
    fn intersect_is_associative_over_numeric_specifiers() {
        let specs = vec![
            VersionSpecifier::Any,
            VersionSpecifier::AtLeast(v("1.0.0")),
            VersionSpecifier::AtLeast(v("1.5.0")),
            VersionSpecifier::CompatibleWith(v("1.2.0")),
            VersionSpecifier::Exactly(v("1.5.0")),
        ];
        for a in &specs {
            for b in &specs {
                for c in &specs {
                    let left = a
                        .intersect(b)
                        .and_then(|ab| ab.intersect(c));
                    let right = b
                        .intersect(c)
                        .and_then(|bc| a.intersect(&bc));
                    assert_eq!(left, right, "a={a:?} b={b:?} c={c:?}");
                }
            }
        }
    }

    #[test]
    fn non_parseable_pinned_version_only_satisfies_any_and_matching_git_reference() {
        let pinned = PinnedVersion::new("feature/foo");
        assert!(VersionSpecifier::Any.accepts_pinned(&pinned));
        assert!(VersionSpecifier::GitReference("feature/foo".into()).accepts_pinned(&pinned));
        assert!(!VersionSpecifier::GitReference("feature/bar".into()).accepts_pinned(&pinned));
        assert!(!VersionSpecifier::AtLeast(v("1.0.0")).accepts_pinned(&pinned));
    }
}

/// Algebraic-law checks over the version-set algebra: commutativity, identity, and
/// associativity, generated over arbitrary inputs rather than the hand-picked fixtures above.
#[cfg(test)]
mod algebra_laws {
    use super::*;
    use proptest::prelude::*;

    fn arb_semver() -> impl Strategy<Value = SemanticVersion> {
        (0u64..5, 0u64..5, 0u64..5).prop_map(|(major, minor, patch)| SemanticVersion::new(major, minor, patch))
    }

    fn arb_specifier() -> impl Strategy<Value = VersionSpecifier> {
        prop_oneof![
            Just(VersionSpecifier::Any),
            arb_semver().prop_map(VersionSpecifier::AtLeast),
            arb_semver().prop_map(VersionSpecifier::CompatibleWith),
            arb_semver().prop_map(VersionSpecifier::Exactly),
        ]
    }

    proptest! {
        #[test]
        fn intersect_commutes(a in arb_specifier(), b in arb_specifier()) {
            prop_assert_eq!(a.intersect(&b), b.intersect(&a));
        }

        #[test]
        fn any_is_the_identity(a in arb_specifier()) {
            prop_assert_eq!(a.intersect(&VersionSpecifier::Any), Some(a.clone()));
            prop_assert_eq!(VersionSpecifier::Any.intersect(&a), Some(a));
        }

        #[test]
        fn intersect_associates(a in arb_specifier(), b in arb_specifier(), c in arb_specifier()) {
            let left = a.intersect(&b).and_then(|ab| ab.intersect(&c));
            let right = b.intersect(&c).and_then(|bc| a.intersect(&bc));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn intersection_never_accepts_more_than_either_input(a in arb_specifier(), b in arb_specifier(), v in arb_semver()) {
            if let Some(merged) = a.intersect(&b) {
                if merged.accepts(v) {
                    prop_assert!(a.accepts(v) && b.accepts(v));
                }
            }
        }
    }
}
