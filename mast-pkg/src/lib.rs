//! Resolving, fetching, and installing pinned dependencies for a platform-native app ecosystem
//! whose build artifacts are pre-compiled binary framework bundles.
//!
//! A version/dependency data model, a manifest parser, a git-backed source layer, a backtracking
//! resolver, and a binary downloader/installer, all glued together by a project orchestrator.

pub mod binary;
pub mod constraint;
pub mod container;
pub mod dependency;
pub mod error;
pub mod manifest;
pub mod project;
pub mod resolver;
pub mod source;
pub mod version;

pub use constraint::{ConstraintSet, Requirement};
pub use container::{BoundVersion, Constraint, Container, ContainerProvider};
pub use dependency::Dependency;
pub use error::{DownloadError, Error, GitError, InstallError, ManifestError, ResolveError, Warning};
pub use manifest::{Cartfile, ResolvedCartfile};
pub use project::{Project, ProjectEvent};
pub use resolver::{Resolution, Resolver, ResolverOptions};
pub use version::{PinnedVersion, SemanticVersion, VersionSpecifier};
