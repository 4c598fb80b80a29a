//! The project orchestrator: ties the manifest, resolver, container provider, binary downloader,
//! and installer together behind one entry point, emitting a stream of [`ProjectEvent`]s as it
//! works.
//!
//! A single struct holding the long-lived collaborators, with one method per externally visible
//! operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::binary::downloader::{BinaryFrameworkDownloader, HttpBinaryFrameworkDownloader, ReleaseAssetFilter};
use crate::binary::installer;
use crate::binary::platform::{DefaultFrameworkInformationProvider, FrameworkInformationProvider, ToolchainId};
use crate::container::CachingContainerProvider;
use crate::dependency::Dependency;
use crate::error::{Error, Warning};
use crate::manifest::{Cartfile, ResolvedCartfile};
use crate::resolver::{Resolution, Resolver};
use crate::source::fetch_cache::FetchCache;
use crate::source::git::GitMirror;
use crate::source::{cartfile_constraints, DefaultContainerProvider};
use crate::version::PinnedVersion;

/// Long-running operations report progress over this channel rather than returning it inline.
#[derive(Clone, Debug)]
pub enum ProjectEvent {
    Cloning(Dependency),
    Fetching(Dependency),
    CheckingOut(Dependency, String),
    DownloadingBinaryFrameworkDefinition(Dependency, String),
    DownloadingBinaries(Dependency, String),
    SkippedDownloadingBinaries(Dependency, String),
    SkippedInstallingBinaries(Dependency, String),
    SkippedBuilding(Dependency, String),
}

/// The project orchestrator. Holds one [`CachingContainerProvider`] for the lifetime of a single
/// resolution/checkout/install session, so repeated calls share fetched containers.
pub struct Project {
    cache_root: PathBuf,
    output_root: PathBuf,
    mirror: Arc<GitMirror>,
    provider: Arc<CachingContainerProvider<DefaultContainerProvider>>,
    downloader: Box<dyn BinaryFrameworkDownloader>,
    platform_provider: Box<dyn FrameworkInformationProvider>,
    events: Option<UnboundedSender<ProjectEvent>>,
}

impl Project {
    pub fn new(cache_root: PathBuf, output_root: PathBuf, object_dump_tool: impl Into<PathBuf>) -> Self {
        let netrc = crate::binary::netrc::default_netrc_path()
            .and_then(|path| crate::binary::netrc::load(&path).ok().flatten());
        let downloader = HttpBinaryFrameworkDownloader::new(cache_root.join("binaries"), netrc);
        let mirror = Arc::new(GitMirror::new(
            cache_root.join("repositories"),
            Arc::new(FetchCache::with_default_ttl()),
        ));
        let provider = DefaultContainerProvider {
            mirror: mirror.clone(),
            http_client: reqwest::Client::new(),
        };
        Self {
            provider: Arc::new(CachingContainerProvider::new(provider)),
            downloader: Box::new(downloader),
            platform_provider: Box::new(DefaultFrameworkInformationProvider::new(object_dump_tool.into())),
            mirror,
            cache_root,
            output_root,
            events: None,
        }
    }

    /// Install an observer for this project's event stream. Absent, events are silently dropped,
    /// which keeps the orchestrator usable headless in tests.
    pub fn with_event_sender(mut self, sender: UnboundedSender<ProjectEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn emit(&self, event: ProjectEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// The catalogued versions known for `dependency`, newest-first.
    pub async fn available_versions(&self, dependency: &Dependency) -> Result<Vec<PinnedVersion>, Error> {
        self.emit(ProjectEvent::Fetching(dependency.clone()));
        let container = self.provider.get_container(dependency).await?;
        Ok(container.versions().to_vec())
    }

    /// Resolve `cartfile` to a pinned, sorted [`ResolvedCartfile`].
    pub async fn resolve(&self, cartfile: &Cartfile) -> Result<ResolvedCartfile, Error> {
        for (dependency, _) in cartfile.iter() {
            self.emit(ProjectEvent::Cloning(dependency.clone()));
        }
        let constraints = cartfile_constraints(cartfile);
        let resolver = Resolver::new(self.provider.clone());
        match resolver.resolve(constraints).await? {
            Resolution::Success(assignments) => {
                let mut entries = Vec::with_capacity(assignments.len());
                for (dependency, bound) in assignments {
                    let pinned = match bound {
                        crate::container::BoundVersion::Version(v) => PinnedVersion::new(v.to_string()),
                        crate::container::BoundVersion::Revision(r) => PinnedVersion::new(r),
                        crate::container::BoundVersion::Unversioned => PinnedVersion::new("unversioned".to_string()),
                        crate::container::BoundVersion::Excluded => continue,
                    };
                    entries.push((dependency, pinned));
                }
                Ok(ResolvedCartfile::new(entries))
            }
            Resolution::Unsatisfiable { dependencies, pins } => Err(crate::error::unsatisfiable(
                dependencies.into_iter().collect(),
                pins.into_iter().collect(),
            )
            .into()),
        }
    }

    /// Materialize a working tree for `dependency` at `version`, updating submodules recursively
    /// when `use_submodules` is set.
    pub async fn checkout(
        &self,
        dependency: &Dependency,
        version: &PinnedVersion,
        working_tree: &Path,
        use_submodules: bool,
    ) -> Result<(), Error> {
        let clone_url = dependency
            .git_clone_url()
            .ok_or_else(|| Error::Other(format!("{dependency} has no git clone URL")))?;
        self.emit(ProjectEvent::CheckingOut(dependency.clone(), version.to_string()));
        let mirror = &self.mirror;
        let sha = mirror.resolve_reference(&clone_url, version.as_str()).await?;
        mirror.checkout(&clone_url, working_tree, &sha, true).await?;

        if use_submodules {
            self.checkout_submodules_recursive(&clone_url, &sha, working_tree).await?;
        }
        Ok(())
    }

    fn checkout_submodules_recursive<'a>(
        &'a self,
        clone_url: &'a str,
        revision: &'a str,
        working_tree: &'a Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(async move {
            let mirror = &self.mirror;
            let submodules = mirror.submodules_at_revision(clone_url, revision).await?;
            for submodule in submodules {
                let submodule_tree = working_tree.join(&submodule.path);
                mirror.clone_or_fetch(&submodule.url).await?;
                mirror.checkout(&submodule.url, &submodule_tree, &submodule.sha, true).await?;
                self.checkout_submodules_recursive(&submodule.url, &submodule.sha, &submodule_tree).await?;
            }
            Ok(())
        })
    }

    /// Install `dependency` at `version`: for `Git`/`GitHub`, attempt a binary install first when
    /// `use_binaries` is set, falling back to source checkout on any failure; for `Binary`,
    /// always use the binary installer.
    pub async fn install(
        &self,
        dependency: &Dependency,
        version: &PinnedVersion,
        working_tree: &Path,
        use_binaries: bool,
        toolchain: &ToolchainId,
    ) -> Result<(Dependency, PinnedVersion), Error> {
        match dependency {
            Dependency::Binary { url } => {
                self.emit(ProjectEvent::DownloadingBinaryFrameworkDefinition(dependency.clone(), url.clone()));
                let project = crate::source::binary::fetch_binary_project_definition(&reqwest::Client::new(), url).await?;
                let Some(artifact_url) = project.artifact_url(version.as_str()) else {
                    return Err(Error::Other(format!("{dependency} has no published artifact for version {version}")));
                };
                self.emit(ProjectEvent::DownloadingBinaries(dependency.clone(), version.to_string()));
                let archive_path = self
                    .downloader
                    .download_binary(dependency, version.as_str(), artifact_url.as_str(), true)
                    .await?;
                installer::install(
                    &archive_path,
                    &dependency.name(),
                    version.as_str(),
                    working_tree,
                    toolchain,
                    self.platform_provider.as_ref(),
                )?;
                Ok((dependency.clone(), version.clone()))
            }
            Dependency::Git { .. } | Dependency::GitHub { .. } => {
                if use_binaries {
                    match self.try_install_binary(dependency, version, working_tree, toolchain).await {
                        Ok(()) => return Ok((dependency.clone(), version.clone())),
                        Err(reason) => {
                            self.emit(ProjectEvent::SkippedInstallingBinaries(dependency.clone(), reason.to_string()));
                        }
                    }
                }
                self.emit(ProjectEvent::SkippedBuilding(dependency.clone(), "source checkout only".to_string()));
                self.checkout(dependency, version, working_tree, true).await?;
                Ok((dependency.clone(), version.clone()))
            }
        }
    }

    async fn try_install_binary(
        &self,
        dependency: &Dependency,
        version: &PinnedVersion,
        working_tree: &Path,
        toolchain: &ToolchainId,
    ) -> Result<(), Error> {
        let Dependency::GitHub { server, repo, .. } = dependency else {
            return Err(Error::Other(format!("{dependency} is not a release-host-backed dependency")));
        };
        let filter = ReleaseAssetFilter {
            allowed_content_types: vec!["application/zip".to_string(), "application/octet-stream".to_string()],
            name_pattern: dependency.name(),
        };
        let archive_paths = self
            .downloader
            .download_from_release_host(dependency, version.as_str(), server, repo, &filter)
            .await?;
        let Some(archive_path) = archive_paths.first() else {
            return Err(Error::Other(format!("no matching release asset found for {dependency} {version}")));
        };
        installer::install(
            archive_path,
            &dependency.name(),
            version.as_str(),
            working_tree,
            toolchain,
            self.platform_provider.as_ref(),
        )?;
        Ok(())
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }
}

/// Convert a [`Warning`] into a human-readable status line via `mast_tracing`, routing non-fatal
/// conditions through the tracing-backed warning helper rather than `eprintln!`.
pub fn report_warning(warning: &Warning) {
    mast_tracing::println_warning(&warning.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_event_clone_roundtrips_for_diagnostics() {
        let dep = Dependency::Git { url: "https://example.com/o/r.git".to_string() };
        let event = ProjectEvent::Fetching(dep.clone());
        let cloned = event.clone();
        match cloned {
            ProjectEvent::Fetching(d) => assert_eq!(d, dep),
            _ => panic!("expected Fetching"),
        }
    }
}
