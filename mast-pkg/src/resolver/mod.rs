//! Backtracking depth-first dependency resolution.
//!
//! Folds a manifest's dependency list into one consistent graph, expressed as short-circuiting
//! recursion over version-set backtracking: each identifier tries its accepted candidates
//! newest-first, recursing into the candidate's own dependencies before committing to it, and
//! backtracking to the next candidate the moment a subtree proves inconsistent.

pub mod delta_debug;
mod lazy;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::constraint::{ConstraintSet, Requirement};
use crate::container::{BoundVersion, CachingContainerProvider, Constraint, Container, ContainerProvider};
use crate::dependency::Dependency;
use crate::error::ResolveError;
use crate::version::{PinnedVersion, VersionSpecifier};

use lazy::{bound_satisfies, flatten, merge_assignments};

/// One identifier's binding, paired with the container it was bound against.
pub type Assignment = HashMap<Dependency, (Arc<dyn Container>, BoundVersion)>;

/// The outcome of a resolution attempt that didn't hard-error.
#[derive(Debug)]
pub enum Resolution {
    Success(Vec<(Dependency, BoundVersion)>),
    Unsatisfiable {
        dependencies: Vec<Dependency>,
        pins: Vec<Dependency>,
    },
}

/// Identifiers (or specific versions of an identifier) excluded from consideration in the
/// current subtree: rejected candidates during ordinary backtracking, or identifiers suppressed
/// by delta-debug minimization.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    excluded_identifiers: std::collections::HashSet<Dependency>,
}

impl Exclusions {
    fn excludes(&self, dep: &Dependency) -> bool {
        self.excluded_identifiers.contains(dep)
    }
}

/// Shared flag recording that some subtree has already hit a hard (non-backtrackable) error, so
/// sibling subtrees still in flight can yield an empty sequence immediately instead of continuing
/// to search fruitlessly. The error itself still propagates normally via `?` from wherever it
/// originated; this only short-circuits *other* branches.
pub type FirstError = Arc<OnceLock<String>>;

/// Tuning knobs the caller may override.
#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Suppresses new container fetches: an identifier not already cached is silently treated as
    /// `Unversioned` and omitted from further consideration. Used by the diagnoser to avoid
    /// network traffic during minimization.
    pub incomplete_mode: bool,
    /// Wall-clock budget for the unsatisfiability diagnosis pass.
    pub diagnosis_budget: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            incomplete_mode: false,
            diagnosis_budget: delta_debug::DEFAULT_TIME_BUDGET,
        }
    }
}

pub struct Resolver<P> {
    provider: Arc<CachingContainerProvider<P>>,
    options: ResolverOptions,
}

impl<P: ContainerProvider + Send + Sync + 'static> Resolver<P> {
    pub fn new(provider: Arc<CachingContainerProvider<P>>) -> Self {
        Self {
            provider,
            options: ResolverOptions::default(),
        }
    }

    pub fn with_options(provider: Arc<CachingContainerProvider<P>>, options: ResolverOptions) -> Self {
        Self { provider, options }
    }

    /// Resolve `constraints` (the manifest's declared dependencies, plus any pin hints) to a
    /// consistent assignment, or diagnose why none exists.
    pub async fn resolve(&self, constraints: Vec<Constraint>) -> Result<Resolution, ResolveError> {
        let first_error: FirstError = Arc::new(OnceLock::new());
        let exclusions = Exclusions::default();

        let outcome = self
            .merge(
                constraints.clone(),
                Assignment::new(),
                ConstraintSet::new(),
                &exclusions,
                &first_error,
            )
            .await?;

        match outcome {
            Some((assignment, _)) => Ok(Resolution::Success(flatten(assignment))),
            None => {
                let (dependencies, pins) = self.diagnose(&constraints).await?;
                Ok(Resolution::Unsatisfiable { dependencies, pins })
            }
        }
    }

    /// Fold `constraints` left, combining the accumulated assignment/constraint-set prefix with
    /// each subtree's solution in turn. Returns `Ok(None)` if the whole combination is
    /// unsatisfiable (never `Err`, unless a subtree hit a hard error).
    fn merge<'a>(
        &'a self,
        constraints: Vec<Constraint>,
        assignment: Assignment,
        constraint_set: ConstraintSet,
        exclusions: &'a Exclusions,
        first_error: &'a FirstError,
    ) -> BoxFuture<'a, Result<Option<(Assignment, ConstraintSet)>, ResolveError>> {
        async move {
            let mut assignment = assignment;
            let mut constraint_set = constraint_set;

            for c in constraints {
                if first_error.get().is_some() {
                    return Ok(None);
                }

                constraint_set = match constraint_set.with_constraint(c.identifier.clone(), c.requirement.clone()) {
                    Some(cs) => cs,
                    None => return Ok(None),
                };

                if let Some((_, bound)) = assignment.get(&c.identifier) {
                    let requirement = constraint_set.get(&c.identifier).expect("just inserted");
                    if !bound_satisfies(bound, requirement) {
                        return Ok(None);
                    }
                    continue;
                }

                let sub = self
                    .resolve_subtree(&c.identifier, &constraint_set, exclusions, first_error)
                    .await?;
                match sub {
                    Some((sub_assignment, sub_constraints)) => {
                        assignment = match merge_assignments(&assignment, &sub_assignment) {
                            Some(merged) => merged,
                            None => return Ok(None),
                        };
                        constraint_set = match constraint_set.merge(&sub_constraints) {
                            Some(merged) => merged,
                            None => return Ok(None),
                        };
                    }
                    None => return Ok(None),
                }
            }

            Ok(Some((assignment, constraint_set)))
        }
        .boxed()
    }

    /// Expand a single identifier according to its current requirement, trying candidates
    /// newest-first for a `VersionSet` and returning the first one whose transitive dependencies
    /// also resolve.
    fn resolve_subtree<'a>(
        &'a self,
        identifier: &'a Dependency,
        constraint_set: &'a ConstraintSet,
        exclusions: &'a Exclusions,
        first_error: &'a FirstError,
    ) -> BoxFuture<'a, Result<Option<(Assignment, ConstraintSet)>, ResolveError>> {
        async move {
            if first_error.get().is_some() || exclusions.excludes(identifier) {
                return Ok(None);
            }

            if self.options.incomplete_mode && !self.provider.is_cached(identifier).await {
                // Not already cached: silently omit it from consideration rather than triggering
                // a network fetch. Used by the diagnoser during minimization.
                return Ok(Some((Assignment::new(), ConstraintSet::new())));
            }

            let container = match self.provider.get_container(identifier).await {
                Ok(c) => c,
                Err(e) => {
                    let _ = first_error.set(e.to_string());
                    return Err(e);
                }
            };

            let requirement = constraint_set
                .get(identifier)
                .cloned()
                .unwrap_or(Requirement::VersionSet(VersionSpecifier::Any));

            match requirement {
                Requirement::Unversioned => {
                    let deps = container.unversioned_dependencies().await.map_err(|e| {
                        let _ = first_error.set(e.to_string());
                        e
                    })?;
                    let mut assignment = Assignment::new();
                    assignment.insert(identifier.clone(), (container.clone(), BoundVersion::Unversioned));
                    self.merge(deps, assignment, ConstraintSet::new(), exclusions, first_error)
                        .await
                }
                Requirement::Revision(r) => {
                    let deps = container.dependencies_at_revision(&r).await.map_err(|e| {
                        let _ = first_error.set(e.to_string());
                        e
                    })?;
                    let mut assignment = Assignment::new();
                    assignment.insert(identifier.clone(), (container.clone(), BoundVersion::Revision(r)));
                    self.merge(deps, assignment, ConstraintSet::new(), exclusions, first_error)
                        .await
                }
                Requirement::VersionSet(spec) => {
                    self.resolve_version_set(identifier, &spec, &container, exclusions, first_error)
                        .await
                }
            }
        }
        .boxed()
    }

    fn resolve_version_set<'a>(
        &'a self,
        identifier: &'a Dependency,
        spec: &'a VersionSpecifier,
        container: &'a Arc<dyn Container>,
        exclusions: &'a Exclusions,
        first_error: &'a FirstError,
    ) -> BoxFuture<'a, Result<Option<(Assignment, ConstraintSet)>, ResolveError>> {
        async move {
            let mut previous: Option<crate::version::SemanticVersion> = None;
            for pinned in container.versions() {
                if first_error.get().is_some() {
                    return Ok(None);
                }
                let Some(sem) = pinned.semantic_version() else {
                    continue;
                };
                if let Some(prev) = previous {
                    debug_assert!(sem <= prev, "container versions must be visited newest-first");
                }
                previous = Some(sem);
                if !spec.accepts(sem) {
                    continue;
                }

                let deps = container.dependencies_at_version(pinned).await.map_err(|e| {
                    let _ = first_error.set(e.to_string());
                    e
                })?;

                if let Some(offending) = revision_conflict(&deps) {
                    let err = ResolveError::RevisionConstraints {
                        dep: identifier.clone(),
                        version: pinned.to_string(),
                        offending_revisions: vec![offending],
                    };
                    let _ = first_error.set(err.to_string());
                    return Err(err);
                }

                let mut assignment = Assignment::new();
                assignment.insert(identifier.clone(), (container.clone(), BoundVersion::Version(sem)));

                let attempt = self
                    .merge(deps, assignment, ConstraintSet::new(), exclusions, first_error)
                    .await?;
                if attempt.is_some() {
                    return Ok(attempt);
                }
            }
            Ok(None)
        }
        .boxed()
    }

    /// Delta-debug over `{AllowPackage(id)} ∪ {AllowPin(id)}` to find the minimal subset of the
    /// manifest's own constraints that's still enough to reproduce the conflict, with everything
    /// outside that subset relaxed (`AllowPackage` absent drops the identifier from
    /// consideration entirely; `AllowPin` absent keeps the identifier but forces it
    /// `Unversioned` rather than honoring its declared version/revision). The full change set —
    /// every identifier's real constraint kept — is exactly the original failing resolution, so
    /// minimizing it down while the resolution keeps failing isolates the dependencies and pins
    /// actually responsible.
    async fn diagnose(
        &self,
        constraints: &[Constraint],
    ) -> Result<(Vec<Dependency>, Vec<Dependency>), ResolveError> {
        let identifiers: Vec<Dependency> = constraints.iter().map(|c| c.identifier.clone()).collect();
        let mut changes = Vec::new();
        for id in &identifiers {
            changes.push(delta_debug::Change::AllowPackage(id.clone()));
            changes.push(delta_debug::Change::AllowPin(id.clone()));
        }

        let predicate = |subset: Vec<delta_debug::Change>| {
            let constraints = constraints.to_vec();
            async move {
                let allowed_packages: std::collections::HashSet<Dependency> = subset
                    .iter()
                    .filter_map(|c| match c {
                        delta_debug::Change::AllowPackage(id) => Some(id.clone()),
                        _ => None,
                    })
                    .collect();
                let allowed_pins: std::collections::HashSet<Dependency> = subset
                    .iter()
                    .filter_map(|c| match c {
                        delta_debug::Change::AllowPin(id) => Some(id.clone()),
                        _ => None,
                    })
                    .collect();

                let restricted: Vec<Constraint> = constraints
                    .into_iter()
                    .filter(|c| allowed_packages.contains(&c.identifier))
                    .map(|c| {
                        if allowed_pins.contains(&c.identifier) {
                            c
                        } else {
                            Constraint::new(c.identifier, Requirement::Unversioned)
                        }
                    })
                    .collect();

                let exclusions = Exclusions::default();
                let first_error: FirstError = Arc::new(OnceLock::new());
                let still_fails = self
                    .merge(restricted, Assignment::new(), ConstraintSet::new(), &exclusions, &first_error)
                    .await
                    .ok()
                    .flatten()
                    .is_none();
                still_fails
            }
        };

        let minimal = delta_debug::run(changes, predicate, self.options.diagnosis_budget)
            .await
            .map_err(|_| ResolveError::ReachedTimeLimit)?;

        let mut dependencies = Vec::new();
        let mut pins = Vec::new();
        for change in minimal {
            match change {
                delta_debug::Change::AllowPackage(id) => dependencies.push(id),
                delta_debug::Change::AllowPin(id) => pins.push(id),
            }
        }
        Ok((dependencies, pins))
    }
}

/// Whether any of `deps` demands a `Revision` pin on an identifier another part of the graph
/// already wants resolved to a catalogued version. This is a hard error rather than an ordinary
/// merge-table narrowing, since a versioned container cannot retroactively be told one of its own
/// dependencies must live at an arbitrary revision.
fn revision_conflict(deps: &[Constraint]) -> Option<Dependency> {
    deps.iter()
        .find(|c| matches!(c.requirement, Requirement::Revision(_)))
        .map(|c| c.identifier.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SemanticVersion;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    fn dep(name: &str) -> Dependency {
        Dependency::GitHub {
            server: "github.com".into(),
            owner: "o".into(),
            repo: name.into(),
        }
    }

    struct FixtureContainer {
        id: Dependency,
        versions: Vec<PinnedVersion>,
        deps_at_version: StdHashMap<String, Vec<Constraint>>,
    }

    #[async_trait]
    impl Container for FixtureContainer {
        fn identifier(&self) -> &Dependency {
            &self.id
        }
        fn versions(&self) -> &[PinnedVersion] {
            &self.versions
        }
        async fn dependencies_at_version(&self, at: &PinnedVersion) -> Result<Vec<Constraint>, ResolveError> {
            Ok(self.deps_at_version.get(at.as_str()).cloned().unwrap_or_default())
        }
        async fn dependencies_at_revision(&self, _at: &str) -> Result<Vec<Constraint>, ResolveError> {
            Ok(vec![])
        }
        async fn unversioned_dependencies(&self) -> Result<Vec<Constraint>, ResolveError> {
            Ok(vec![])
        }
    }

    struct FixtureProvider {
        containers: Mutex<StdHashMap<Dependency, Arc<FixtureContainer>>>,
    }

    #[async_trait]
    impl ContainerProvider for FixtureProvider {
        async fn fetch_container(&self, dependency: &Dependency) -> Result<Arc<dyn Container>, ResolveError> {
            let containers = self.containers.lock().unwrap();
            containers
                .get(dependency)
                .cloned()
                .map(|c| c as Arc<dyn Container>)
                .ok_or_else(|| ResolveError::UnknownDependencies(vec![dependency.name()]))
        }
    }

    fn provider_with(containers: Vec<FixtureContainer>) -> Arc<CachingContainerProvider<FixtureProvider>> {
        let mut map = StdHashMap::new();
        for c in containers {
            map.insert(c.id.clone(), Arc::new(c));
        }
        Arc::new(CachingContainerProvider::new(FixtureProvider {
            containers: Mutex::new(map),
        }))
    }

    #[tokio::test]
    async fn trivial_resolve_picks_newest_accepted_version() {
        let provider = provider_with(vec![FixtureContainer {
            id: dep("A"),
            versions: vec![PinnedVersion::new("2.0.0"), PinnedVersion::new("1.0.0")],
            deps_at_version: StdHashMap::new(),
        }]);
        let resolver = Resolver::new(provider);
        let constraints = vec![Constraint::new(
            dep("A"),
            Requirement::VersionSet(VersionSpecifier::Any),
        )];
        let resolution = resolver.resolve(constraints).await.unwrap();
        match resolution {
            Resolution::Success(bindings) => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].1, BoundVersion::Version(SemanticVersion::new(2, 0, 0)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transitive_intersection_narrows_to_shared_version() {
        let mut a_deps = StdHashMap::new();
        a_deps.insert(
            "2.0.0".to_string(),
            vec![Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::AtLeast(SemanticVersion::new(1, 5, 0))),
            )],
        );
        let provider = provider_with(vec![
            FixtureContainer {
                id: dep("A"),
                versions: vec![PinnedVersion::new("2.0.0")],
                deps_at_version: a_deps,
            },
            FixtureContainer {
                id: dep("B"),
                versions: vec![PinnedVersion::new("2.0.0"), PinnedVersion::new("1.5.0")],
                deps_at_version: StdHashMap::new(),
            },
        ]);
        let resolver = Resolver::new(provider);
        let constraints = vec![
            Constraint::new(dep("A"), Requirement::VersionSet(VersionSpecifier::Any)),
            Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 5, 0))),
            ),
        ];
        let resolution = resolver.resolve(constraints).await.unwrap();
        match resolution {
            Resolution::Success(bindings) => {
                let b = bindings.iter().find(|(id, _)| id == &dep("B")).unwrap();
                assert_eq!(b.1, BoundVersion::Version(SemanticVersion::new(1, 5, 0)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backtracks_when_newest_version_is_incompatible_transitively() {
        let mut a_deps = StdHashMap::new();
        a_deps.insert(
            "2.0.0".to_string(),
            vec![Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(9, 0, 0))),
            )],
        );
        a_deps.insert(
            "1.0.0".to_string(),
            vec![Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::Any),
            )],
        );
        let provider = provider_with(vec![
            FixtureContainer {
                id: dep("A"),
                versions: vec![PinnedVersion::new("2.0.0"), PinnedVersion::new("1.0.0")],
                deps_at_version: a_deps,
            },
            FixtureContainer {
                id: dep("B"),
                versions: vec![PinnedVersion::new("1.0.0")],
                deps_at_version: StdHashMap::new(),
            },
        ]);
        let resolver = Resolver::new(provider);
        let constraints = vec![Constraint::new(dep("A"), Requirement::VersionSet(VersionSpecifier::Any))];
        let resolution = resolver.resolve(constraints).await.unwrap();
        match resolution {
            Resolution::Success(bindings) => {
                let a = bindings.iter().find(|(id, _)| id == &dep("A")).unwrap();
                assert_eq!(a.1, BoundVersion::Version(SemanticVersion::new(1, 0, 0)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsatisfiable_inputs_are_diagnosed_rather_than_erroring() {
        let provider = provider_with(vec![FixtureContainer {
            id: dep("A"),
            versions: vec![PinnedVersion::new("1.0.0")],
            deps_at_version: StdHashMap::new(),
        }]);
        let resolver = Resolver::new(provider);
        let constraints = vec![Constraint::new(
            dep("A"),
            Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(2, 0, 0))),
        )];
        let resolution = resolver.resolve(constraints).await.unwrap();
        match resolution {
            Resolution::Unsatisfiable { dependencies, pins } => {
                assert_eq!(dependencies, vec![dep("A")]);
                assert_eq!(pins, vec![dep("A")]);
            }
            other => panic!("expected unsatisfiable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn revision_pin_on_a_versioned_container_is_rejected() {
        let mut a_deps = StdHashMap::new();
        a_deps.insert(
            "1.0.0".to_string(),
            vec![Constraint::new(dep("B"), Requirement::Revision("abc123".to_string()))],
        );
        let provider = provider_with(vec![FixtureContainer {
            id: dep("A"),
            versions: vec![PinnedVersion::new("1.0.0")],
            deps_at_version: a_deps,
        }]);
        let resolver = Resolver::new(provider);
        let constraints = vec![Constraint::new(
            dep("A"),
            Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 0, 0))),
        )];
        let err = resolver.resolve(constraints).await.unwrap_err();
        match err {
            ResolveError::RevisionConstraints { dep: offending_dep, version, offending_revisions } => {
                assert_eq!(offending_dep, dep("A"));
                assert_eq!(version, "1.0.0");
                assert_eq!(offending_revisions, vec![dep("B")]);
            }
            other => panic!("expected RevisionConstraints, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn two_dependency_conflict_diagnoses_both_pins_as_the_minimal_set() {
        // `A@1.0.0` requires `B ~> 2.0`, but the manifest pins `B == 1.0.0` directly: the conflict
        // only exists because both pins are exact, so neither can be relaxed to `Unversioned`
        // without the conflict disappearing.
        let mut a_deps = StdHashMap::new();
        a_deps.insert(
            "1.0.0".to_string(),
            vec![Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::CompatibleWith(SemanticVersion::new(2, 0, 0))),
            )],
        );
        let provider = provider_with(vec![
            FixtureContainer {
                id: dep("A"),
                versions: vec![PinnedVersion::new("1.0.0")],
                deps_at_version: a_deps,
            },
            FixtureContainer {
                id: dep("B"),
                versions: vec![PinnedVersion::new("2.0.0"), PinnedVersion::new("1.0.0")],
                deps_at_version: StdHashMap::new(),
            },
        ]);
        let resolver = Resolver::new(provider);
        let constraints = vec![
            Constraint::new(
                dep("A"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 0, 0))),
            ),
            Constraint::new(
                dep("B"),
                Requirement::VersionSet(VersionSpecifier::Exactly(SemanticVersion::new(1, 0, 0))),
            ),
        ];
        let resolution = resolver.resolve(constraints).await.unwrap();
        match resolution {
            Resolution::Unsatisfiable { mut dependencies, mut pins } => {
                dependencies.sort_by_key(|d| d.name());
                pins.sort_by_key(|d| d.name());
                assert_eq!(dependencies, vec![dep("A"), dep("B")]);
                assert_eq!(pins, vec![dep("A"), dep("B")]);
            }
            other => panic!("expected unsatisfiable, got {other:?}"),
        }
    }
}
