//! Error taxonomy: one `thiserror`-derived enum per concern, each carrying enough context for
//! actionable reporting, composed under a top-level [`Error`] at the orchestrator boundary.

use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error as ThisError;

use crate::dependency::Dependency;
use crate::version::VersionSpecifier;

#[derive(ThisError, Debug)]
pub enum ManifestError {
    #[error("{path}:{line}: {reason}")]
    ParseError {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("duplicate dependency {0} declared more than once in the manifest")]
    DuplicateDependencies(Dependency),
    #[error("failed to read manifest at {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("invalid binary project JSON at {url}: {reason}")]
    InvalidBinaryJson { url: String, reason: String },
}

#[derive(ThisError, Debug)]
pub enum GitError {
    #[error("failed to clone or fetch {url}: {source}")]
    CloneOrFetchFailed { url: String, source: git2::Error },
    #[error("git reference {0:?} not found")]
    GitReferenceNotFound(String),
    #[error("installed git version is too old: have {have}, need {need}")]
    GitVersionTooOld { have: String, need: String },
    #[error("failed to check out {dir}: {reason}")]
    RepositoryCheckoutFailed { dir: PathBuf, reason: String },
    #[error("failed to parse .gitmodules for {repo}: {reason}")]
    SubmoduleParseFailed { repo: String, reason: String },
    #[error(transparent)]
    Git2(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(ThisError, Debug)]
pub enum ResolveError {
    #[error("unable to resolve a version set satisfying all constraints; conflicting dependencies: {conflicting_deps:?}, conflicting pins: {conflicting_pins:?}")]
    Unsatisfiable {
        conflicting_deps: Vec<Dependency>,
        conflicting_pins: Vec<Dependency>,
    },
    #[error("{dep} at {version} requires {offending_revisions:?} to be pinned to a revision, but {dep} is a versioned container")]
    RevisionConstraints {
        dep: Dependency,
        version: String,
        offending_revisions: Vec<Dependency>,
    },
    #[error("no version of {dep} satisfies {specifier}")]
    RequiredVersionNotFound {
        dep: Dependency,
        specifier: VersionSpecifier,
    },
    #[error("unknown dependencies: {0:?}")]
    UnknownDependencies(Vec<String>),
    #[error("unresolved dependencies: {0:?}")]
    UnresolvedDependencies(Vec<String>),
    #[error("reached the delta-debug time limit before a minimal diagnosis could be found")]
    ReachedTimeLimit,
    #[error("failed to fetch container for {0}")]
    ContainerFetchFailed(Dependency, #[source] anyhow::Error),
}

#[derive(ThisError, Debug)]
pub enum DownloadError {
    #[error("failed reading {url}: {cause}")]
    ReadFailed { url: String, cause: String },
    #[error("failed writing {url}: {cause}")]
    WriteFailed { url: String, cause: String },
    #[error("release host API request failed: {0}")]
    ReleaseHostApiRequestFailed(String),
    #[error("release host API request timed out")]
    ReleaseHostApiTimeout,
    #[error("missing environment variable {0}")]
    MissingEnvironmentVariable(String),
    #[error("invalid binary project JSON at {url}: {reason}")]
    InvalidBinaryJson { url: String, reason: String },
}

#[derive(ThisError, Debug)]
pub enum InstallError {
    #[error("multiple archive members map to the same install path: {0:?}")]
    DuplicatesInArchive(std::collections::BTreeMap<PathBuf, Vec<PathBuf>>),
    #[error("incompatible framework at {path}: {reason}")]
    IncompatibleFramework { path: PathBuf, reason: String },
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// The top-level error type returned by the [`crate::project::Project`] orchestrator, wrapping
/// each subsystem's error taxonomy.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("missing manifest at path: {0}")]
    MissingManifest(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// A warning is an unexpected but handleable situation that should still be surfaced to the
/// user without aborting the operation in progress.
#[derive(ThisError, Debug, Clone)]
pub enum Warning {
    #[error("binary framework installation for {dep} was skipped: {reason}")]
    SkippedInstallingBinaries { dep: Dependency, reason: String },
    #[error("binary framework download for {dep} was skipped: {reason}")]
    SkippedDownloadingBinaries { dep: Dependency, reason: String },
}

/// Convenience conversion for reporting the minimal conflicting subset alongside an
/// unsatisfiable resolution.
pub fn unsatisfiable(conflicting_deps: HashSet<Dependency>, conflicting_pins: HashSet<Dependency>) -> ResolveError {
    ResolveError::Unsatisfiable {
        conflicting_deps: conflicting_deps.into_iter().collect(),
        conflicting_pins: conflicting_pins.into_iter().collect(),
    }
}
