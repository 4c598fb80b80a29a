//! The container abstraction the resolver walks.
//!
//! A [`Container`] is an in-memory handle for one dependency identifier: it knows which versions
//! exist and what each one (or revision, or the unversioned working tree) requires. A
//! [`ContainerProvider`] produces containers on demand and caches them for the lifetime of one
//! resolution, with async population and concurrent callers awaiting the same in-flight fetch
//! rather than racing each other.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use crate::constraint::{ConstraintSet, Requirement};
use crate::dependency::Dependency;
use crate::error::ResolveError;
use crate::version::PinnedVersion;

/// What a resolved identifier ultimately got bound to.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum BoundVersion {
    /// Excluded during delta-debug minimization; never part of a final assignment.
    Excluded,
    Version(crate::version::SemanticVersion),
    Revision(String),
    Unversioned,
}

impl std::fmt::Display for BoundVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundVersion::Excluded => write!(f, "excluded"),
            BoundVersion::Version(v) => write!(f, "{v}"),
            BoundVersion::Revision(r) => write!(f, "{r}"),
            BoundVersion::Unversioned => write!(f, "unversioned"),
        }
    }
}

/// A single transitive requirement a container's manifest declares on another identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constraint {
    pub identifier: Dependency,
    pub requirement: Requirement,
}

impl Constraint {
    pub fn new(identifier: Dependency, requirement: Requirement) -> Self {
        Self {
            identifier,
            requirement,
        }
    }
}

/// Fold a list of constraints into a [`ConstraintSet`], failing if any two disagree.
pub fn constraints_into_set(constraints: &[Constraint]) -> Option<ConstraintSet> {
    constraints.iter().try_fold(ConstraintSet::new(), |set, c| {
        set.with_constraint(c.identifier.clone(), c.requirement.clone())
    })
}

/// An in-memory handle for one dependency identifier's available versions and their
/// dependencies.
#[async_trait]
pub trait Container: Send + Sync {
    /// The identifier this container was fetched for.
    fn identifier(&self) -> &Dependency;

    /// Available pinned versions, newest-first, already filtered by the container (e.g. to only
    /// parseable semantic-version tags).
    fn versions(&self) -> &[PinnedVersion];

    /// The constraints declared by the manifest checked out at `at`.
    async fn dependencies_at_version(&self, at: &PinnedVersion) -> Result<Vec<Constraint>, ResolveError>;

    /// The constraints declared by the manifest at an arbitrary git reference (branch, tag, or
    /// commit) rather than a catalogued version.
    async fn dependencies_at_revision(&self, at: &str) -> Result<Vec<Constraint>, ResolveError>;

    /// The constraints declared by the manifest in the unpinned working tree. Empty for
    /// containers with no notion of an unpinned checkout (e.g. `Binary`).
    async fn unversioned_dependencies(&self) -> Result<Vec<Constraint>, ResolveError>;

    /// The identifier a bound version should be recorded under. Usually `self.identifier()`
    /// unchanged; containers MAY rewrite it (e.g. a `GitHub` dependency resolved through a
    /// mirror keeps its original identity).
    fn updated_identifier(&self, _at: &BoundVersion) -> Dependency {
        self.identifier().clone()
    }
}

/// Produces and caches [`Container`]s for dependency identifiers.
///
/// `get_container` populates `cache` lazily: the first caller to observe a vacant entry computes
/// it, concurrent callers for the same identifier await the same [`OnceCell`] rather than racing
/// a second fetch.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    async fn fetch_container(&self, dependency: &Dependency) -> Result<Arc<dyn Container>, ResolveError>;
}

type CacheEntry = Arc<OnceCell<Result<Arc<dyn Container>, Arc<ResolveError>>>>;

/// Wraps a [`ContainerProvider`] with the shared-cache-of-futures behavior every invocation of
/// the resolver needs: waiters for the same identifier await one shared future instead of each
/// triggering their own fetch.
pub struct CachingContainerProvider<P> {
    inner: P,
    cache: Mutex<HashMap<Dependency, CacheEntry>>,
}

impl<P: ContainerProvider> CachingContainerProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get or populate the container for `dependency`. Concurrent callers for the same
    /// identifier share one in-flight fetch.
    pub async fn get_container(&self, dependency: &Dependency) -> Result<Arc<dyn Container>, ResolveError> {
        let entry = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(dependency.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let result = entry
            .get_or_init(|| async { self.inner.fetch_container(dependency).await.map_err(Arc::new) })
            .await;
        match result {
            Ok(container) => Ok(container.clone()),
            Err(shared_err) => Err(ResolveError::ContainerFetchFailed(
                dependency.clone(),
                anyhow::anyhow!(shared_err.to_string()),
            )),
        }
    }

    /// Whether a container for `dependency` has already been fetched, without triggering a
    /// fetch. Used by the resolver's "incomplete mode" to silently omit not-yet-cached
    /// identifiers during minimization.
    pub async fn is_cached(&self, dependency: &Dependency) -> bool {
        let cache = self.cache.lock().await;
        cache
            .get(dependency)
            .map(|entry| entry.initialized())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubContainer {
        id: Dependency,
        versions: Vec<PinnedVersion>,
    }

    #[async_trait]
    impl Container for StubContainer {
        fn identifier(&self) -> &Dependency {
            &self.id
        }

        fn versions(&self) -> &[PinnedVersion] {
            &self.versions
        }

        async fn dependencies_at_version(&self, _at: &PinnedVersion) -> Result<Vec<Constraint>, ResolveError> {
            Ok(vec![])
        }

        async fn dependencies_at_revision(&self, _at: &str) -> Result<Vec<Constraint>, ResolveError> {
            Ok(vec![])
        }

        async fn unversioned_dependencies(&self) -> Result<Vec<Constraint>, ResolveError> {
            Ok(vec![])
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContainerProvider for CountingProvider {
        async fn fetch_container(&self, dependency: &Dependency) -> Result<Arc<dyn Container>, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubContainer {
                id: dependency.clone(),
                versions: vec![PinnedVersion::new("1.0.0")],
            }))
        }
    }

    fn dep() -> Dependency {
        Dependency::GitHub {
            server: "github.com".into(),
            owner: "o".into(),
            repo: "A".into(),
        }
    }

    #[tokio::test]
    async fn concurrent_fetches_for_same_identifier_hit_the_provider_once() {
        let provider = CachingContainerProvider::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let (a, b) = tokio::join!(
            provider.get_container(&dep()),
            provider.get_container(&dep())
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn is_cached_reflects_population() {
        let provider = CachingContainerProvider::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        assert!(!provider.is_cached(&dep()).await);
        provider.get_container(&dep()).await.unwrap();
        assert!(provider.is_cached(&dep()).await);
    }
}
