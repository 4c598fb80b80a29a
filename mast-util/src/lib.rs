//! Utility items shared between `mast` crates: directory layout, advisory
//! file locking, and the error/exit-code wrapper returned from entry points.

use anyhow::{bail, Context, Result};
use std::{
    collections::hash_map,
    fmt::Display,
    fs::File,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    process::Termination,
};

pub const USER_MAST_DIRECTORY: &str = ".mast";
pub const DEFAULT_ERROR_EXIT_CODE: u8 = 1;
pub const DEFAULT_SUCCESS_EXIT_CODE: u8 = 0;
pub const NETWORK_EXIT_CODE: u8 = 2;
pub const PARSE_EXIT_CODE: u8 = 3;
pub const TIMEOUT_EXIT_CODE: u8 = 4;

/// A result type for mast operations. Entry points should return [`MastCliResult`] rather than
/// this directly, so the correct process exit code is used.
pub type MastResult<T, E = MastError> = Result<T, E>;

/// Wraps a [`MastResult`] so it can be returned from `main` with [`Termination::report`] mapping
/// to the right exit code.
#[derive(Debug)]
pub struct MastCliResult<T> {
    result: MastResult<T>,
}

/// An error type wrapping `anyhow::Error` with an associated process exit code, so a single
/// top-level error can both be displayed and propagate the right exit status.
#[derive(Debug)]
pub struct MastError {
    error: anyhow::Error,
    exit_code: u8,
}

impl MastError {
    pub fn new(error: anyhow::Error, exit_code: u8) -> Self {
        Self { error, exit_code }
    }

    /// Returns a `MastError` with the given exit code instead of the default.
    pub fn exit_code(self, exit_code: u8) -> Self {
        Self { exit_code, ..self }
    }

    pub fn code(&self) -> u8 {
        self.exit_code
    }
}

impl AsRef<anyhow::Error> for MastError {
    fn as_ref(&self) -> &anyhow::Error {
        &self.error
    }
}

impl From<&str> for MastError {
    fn from(value: &str) -> Self {
        Self {
            error: anyhow::anyhow!("{value}"),
            exit_code: DEFAULT_ERROR_EXIT_CODE,
        }
    }
}

impl From<anyhow::Error> for MastError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            error: value,
            exit_code: DEFAULT_ERROR_EXIT_CODE,
        }
    }
}

impl From<std::io::Error> for MastError {
    fn from(value: std::io::Error) -> Self {
        Self {
            error: value.into(),
            exit_code: DEFAULT_ERROR_EXIT_CODE,
        }
    }
}

impl Display for MastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl<T> Termination for MastCliResult<T> {
    fn report(self) -> std::process::ExitCode {
        match self.result {
            Ok(_) => DEFAULT_SUCCESS_EXIT_CODE.into(),
            Err(e) => {
                tracing::error!("error: {}", e);
                e.exit_code.into()
            }
        }
    }
}

impl<T> From<MastResult<T>> for MastCliResult<T> {
    fn from(value: MastResult<T>) -> Self {
        Self { result: value }
    }
}

#[macro_export]
macro_rules! mast_result_bail {
    ($msg:literal $(,)?) => {
        return $crate::MastResult::Err(anyhow::anyhow!($msg).into())
    };
    ($err:expr $(,)?) => {
        return $crate::MastResult::Err(anyhow::anyhow!($err).into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return $crate::MastResult::Err(anyhow::anyhow!($fmt, $($arg)*).into())
    };
}

/// Returns the user's mast directory, `$HOME/.mast` by default.
pub fn user_mast_directory() -> PathBuf {
    dirs::home_dir()
        .expect("unable to find the user home directory")
        .join(USER_MAST_DIRECTORY)
}

/// The root under which bare git mirrors are kept: `repositories/`.
pub fn git_repositories_directory() -> PathBuf {
    user_mast_directory().join("repositories")
}

/// The root under which downloaded binary archives are cached: `binaries/`.
pub fn binaries_cache_directory() -> PathBuf {
    user_mast_directory().join("binaries")
}

/// Validate a dependency/project name against a small set of filesystem-hostile patterns: reject
/// names that would misbehave as path components. Dependency names here are derived from URLs
/// rather than chosen freely, so the check stays limited to path-safety rather than a reserved
/// keyword list.
pub fn validate_name(name: &str, use_case: &str) -> Result<()> {
    if name.is_empty() {
        bail!("{use_case} cannot be empty");
    }
    if name.contains(['/', '\\', '\0']) {
        bail!("the {use_case} {name:?} contains characters that are not allowed in a path component");
    }
    if name == "." || name == ".." {
        bail!("the {use_case} {name:?} is not a valid path component");
    }
    Ok(())
}

/// Hash the path to produce a file-system friendly file name.
fn hash_path(path: &Path) -> String {
    let mut hasher = hash_map::DefaultHasher::default();
    path.hash(&mut hasher);
    let hash = hasher.finish();
    match path.file_stem().and_then(|s| s.to_str()) {
        None => format!("{hash:x}"),
        Some(stem) => format!("{hash:x}-{stem}"),
    }
}

/// Hash an arbitrary string (e.g. a repository URL) into a filesystem-safe directory name.
pub fn hash_string(s: &str) -> String {
    let mut hasher = hash_map::DefaultHasher::default();
    s.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

fn fd_lock_path(path: &Path) -> PathBuf {
    const LOCKS_DIR_NAME: &str = ".locks";
    const LOCK_EXT: &str = "mast-lock";
    let file_name = hash_path(path);
    user_mast_directory()
        .join(LOCKS_DIR_NAME)
        .join(file_name)
        .with_extension(LOCK_EXT)
}

/// Create an advisory lock coordinating access to the given path (e.g. a git checkout
/// directory). The lock file itself is just a placeholder; it is never removed, since removing it
/// could invalidate an existing lock held by a concurrent process.
pub fn path_lock(path: &Path) -> Result<fd_lock::RwLock<File>> {
    let lock_path = fd_lock_path(path);
    let lock_dir = lock_path
        .parent()
        .expect("lock path has no parent directory");
    std::fs::create_dir_all(lock_dir).context("failed to create mast advisory lock directory")?;
    let lock_file = File::create(&lock_path).context("failed to create advisory lock file")?;
    Ok(fd_lock::RwLock::new(lock_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_path_separators() {
        assert!(validate_name("foo/bar", "dependency name").is_err());
        assert!(validate_name("..", "dependency name").is_err());
        assert!(validate_name("", "dependency name").is_err());
        assert!(validate_name("swift-protobuf", "dependency name").is_ok());
    }

    #[test]
    fn hash_path_is_deterministic() {
        let p = Path::new("/some/path");
        assert_eq!(hash_path(p), hash_path(p));
    }

    #[test]
    fn path_lock_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("checkout");
        // Just exercise the code path; we can't easily override user_mast_directory in a test,
        // so this only checks we get a usable lock back without panicking.
        let lock = path_lock(&target);
        assert!(lock.is_ok());
    }
}
