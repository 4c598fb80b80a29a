//! Container implementations backed by real sources: a git mirror for `Git`/`GitHub`
//! dependencies and a fetched JSON definition for `Binary` dependencies.

pub mod binary;
pub mod fetch_cache;
pub mod git;

use std::sync::Arc;

use async_trait::async_trait;

use crate::constraint::Requirement;
use crate::container::{Constraint, Container, ContainerProvider};
use crate::dependency::Dependency;
use crate::error::ResolveError;
use crate::manifest::Cartfile;
use crate::version::{PinnedVersion, VersionSpecifier};

use fetch_cache::FetchCache;
use git::GitMirror;

/// Turn a manifest's declared specifier into the resolver's [`Requirement`] vocabulary.
///
/// A `branch`/`commit` specifier (parsed as [`VersionSpecifier::GitReference`]) pins the
/// dependency to an exact revision rather than narrowing a set of catalogued versions, so it maps
/// to [`Requirement::Revision`] rather than `Requirement::VersionSet` — `VersionSpecifier` itself
/// stays the currency of the version-set algebra, while `Requirement` is the currency the
/// resolver's merge table actually operates on.
pub fn requirement_from_specifier(spec: &VersionSpecifier) -> Requirement {
    match spec {
        VersionSpecifier::GitReference(s) => Requirement::Revision(s.clone()),
        other => Requirement::VersionSet(other.clone()),
    }
}

/// Convert a parsed [`Cartfile`] into the resolver's input constraint list.
pub fn cartfile_constraints(cartfile: &Cartfile) -> Vec<Constraint> {
    cartfile
        .entries()
        .iter()
        .map(|(dep, spec)| Constraint::new(dep.clone(), requirement_from_specifier(spec)))
        .collect()
}

/// A container backed by a mirrored git repository (`Git` or `GitHub` dependencies).
pub struct GitContainer {
    identifier: Dependency,
    clone_url: String,
    mirror: Arc<GitMirror>,
    versions: Vec<PinnedVersion>,
}

impl GitContainer {
    pub async fn fetch(identifier: Dependency, mirror: Arc<GitMirror>) -> Result<Self, ResolveError> {
        let clone_url = identifier
            .git_clone_url()
            .ok_or_else(|| ResolveError::UnknownDependencies(vec![identifier.name()]))?;
        let tags = mirror
            .list_tags(&clone_url)
            .await
            .map_err(|e| ResolveError::ContainerFetchFailed(identifier.clone(), e.into()))?;
        let mut versions: Vec<(crate::version::SemanticVersion, String)> = tags
            .into_iter()
            .filter_map(|tag| crate::version::SemanticVersion::parse(&tag).ok().map(|sem| (sem, tag)))
            .collect();
        versions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(Self {
            identifier,
            clone_url,
            mirror,
            versions: versions.into_iter().map(|(_, tag)| PinnedVersion::new(tag)).collect(),
        })
    }

    async fn constraints_at(&self, sha: &str) -> Result<Vec<Constraint>, ResolveError> {
        let bytes = self
            .mirror
            .contents_at_revision(&self.clone_url, "Cartfile", sha)
            .await
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), e.into()))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), anyhow::anyhow!(e)))?;
        let cartfile = Cartfile::parse(&text)
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), anyhow::anyhow!(e)))?;
        Ok(cartfile_constraints(&cartfile))
    }
}

#[async_trait]
impl Container for GitContainer {
    fn identifier(&self) -> &Dependency {
        &self.identifier
    }

    fn versions(&self) -> &[PinnedVersion] {
        &self.versions
    }

    async fn dependencies_at_version(&self, at: &PinnedVersion) -> Result<Vec<Constraint>, ResolveError> {
        let sha = self
            .mirror
            .resolve_reference(&self.clone_url, at.as_str())
            .await
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), e.into()))?;
        self.constraints_at(&sha).await
    }

    async fn dependencies_at_revision(&self, at: &str) -> Result<Vec<Constraint>, ResolveError> {
        let sha = self
            .mirror
            .resolve_reference(&self.clone_url, at)
            .await
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), e.into()))?;
        self.constraints_at(&sha).await
    }

    async fn unversioned_dependencies(&self) -> Result<Vec<Constraint>, ResolveError> {
        // No separately materialized working tree is required just to read the manifest: the
        // unpinned checkout is, for constraint-gathering purposes, whatever the default branch's
        // tip currently is.
        let sha = self
            .mirror
            .resolve_reference(&self.clone_url, "HEAD")
            .await
            .map_err(|e| ResolveError::ContainerFetchFailed(self.identifier.clone(), e.into()))?;
        self.constraints_at(&sha).await
    }
}

/// A container backed by a fetched [`binary::BinaryProject`] definition (`Binary` dependencies).
/// Binary dependencies declare no nested dependencies.
pub struct BinaryContainer {
    identifier: Dependency,
    versions: Vec<PinnedVersion>,
}

impl BinaryContainer {
    pub fn new(identifier: Dependency, project: &binary::BinaryProject) -> Self {
        Self {
            identifier,
            versions: project.versions_newest_first(),
        }
    }
}

#[async_trait]
impl Container for BinaryContainer {
    fn identifier(&self) -> &Dependency {
        &self.identifier
    }

    fn versions(&self) -> &[PinnedVersion] {
        &self.versions
    }

    async fn dependencies_at_version(&self, _at: &PinnedVersion) -> Result<Vec<Constraint>, ResolveError> {
        Ok(Vec::new())
    }

    async fn dependencies_at_revision(&self, _at: &str) -> Result<Vec<Constraint>, ResolveError> {
        Ok(Vec::new())
    }

    async fn unversioned_dependencies(&self) -> Result<Vec<Constraint>, ResolveError> {
        Ok(Vec::new())
    }
}

/// The default [`ContainerProvider`]: dispatches on [`Dependency`] variant to a [`GitContainer`]
/// or [`BinaryContainer`], using a shared [`GitMirror`] and HTTP client.
pub struct DefaultContainerProvider {
    pub mirror: Arc<GitMirror>,
    pub http_client: reqwest::Client,
}

impl DefaultContainerProvider {
    pub fn new(cache_root: std::path::PathBuf) -> Self {
        Self {
            mirror: Arc::new(GitMirror::new(cache_root, Arc::new(FetchCache::with_default_ttl()))),
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContainerProvider for DefaultContainerProvider {
    async fn fetch_container(&self, dependency: &Dependency) -> Result<Arc<dyn Container>, ResolveError> {
        match dependency {
            Dependency::Git { .. } | Dependency::GitHub { .. } => {
                let container = GitContainer::fetch(dependency.clone(), self.mirror.clone()).await?;
                Ok(Arc::new(container))
            }
            Dependency::Binary { url } => {
                let project = binary::fetch_binary_project_definition(&self.http_client, url)
                    .await
                    .map_err(|e| ResolveError::ContainerFetchFailed(dependency.clone(), e.into()))?;
                Ok(Arc::new(BinaryContainer::new(dependency.clone(), &project)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SemanticVersion;

    #[test]
    fn branch_and_commit_specifiers_become_revision_requirements() {
        let spec = VersionSpecifier::GitReference("develop".into());
        assert_eq!(requirement_from_specifier(&spec), Requirement::Revision("develop".into()));
    }

    #[test]
    fn ordinary_specifiers_become_version_set_requirements() {
        let spec = VersionSpecifier::CompatibleWith(SemanticVersion::new(1, 0, 0));
        assert_eq!(requirement_from_specifier(&spec), Requirement::VersionSet(spec));
    }
}
