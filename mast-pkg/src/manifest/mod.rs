//! `Cartfile` / `Cartfile.resolved` parsing and serialization.

mod grammar;

use crate::dependency::Dependency;
use crate::error::ManifestError;
use crate::version::{PinnedVersion, VersionSpecifier};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The parsed input manifest: a set of unique dependencies with their version specifiers.
///
/// Order is preserved from the source file for reproducible diagnostics, even though resolution
/// semantics don't depend on it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cartfile {
    entries: Vec<(Dependency, VersionSpecifier)>,
}

impl Cartfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cartfile` from its textual contents.
    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        Self::parse_at(contents, Path::new("Cartfile"))
    }

    /// Parse a `Cartfile` from its textual contents, attributing errors to `path`.
    pub fn parse_at(contents: &str, path: &Path) -> Result<Self, ManifestError> {
        let mut entries: Vec<(Dependency, VersionSpecifier)> = Vec::new();
        let mut seen: BTreeMap<Dependency, ()> = BTreeMap::new();

        for (idx, raw_line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = grammar::strip_trailing_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let parsed = grammar::parse_entry_line(line).map_err(|reason| ManifestError::ParseError {
                path: path.to_path_buf(),
                line: line_no,
                reason,
            })?;
            if seen.insert(parsed.dependency.clone(), ()).is_some() {
                return Err(ManifestError::DuplicateDependencies(parsed.dependency));
            }
            entries.push((parsed.dependency, parsed.specifier));
        }
        Ok(Self { entries })
    }

    /// Parse a `Cartfile` from a file on disk.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Io(path.to_path_buf(), e))?;
        Self::parse_at(&contents, path)
    }

    pub fn entries(&self) -> &[(Dependency, VersionSpecifier)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Dependency, VersionSpecifier)> {
        self.entries.iter()
    }
}

/// A single `(Dependency, PinnedVersion)` entry of a resolved manifest.
pub type ResolvedEntry = (Dependency, PinnedVersion);

/// The resolved manifest (`Cartfile.resolved`): one pinned version per dependency, sorted by
/// dependency name (case-insensitive) for stable output.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolvedCartfile {
    entries: Vec<ResolvedEntry>,
}

impl ResolvedCartfile {
    /// Build a `ResolvedCartfile` from an unordered set of pins, sorting by name.
    pub fn new(mut entries: Vec<ResolvedEntry>) -> Self {
        entries.sort_by(|(a, _), (b, _)| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
        Self { entries }
    }

    pub fn entries(&self) -> &[ResolvedEntry] {
        &self.entries
    }

    pub fn get(&self, dep: &Dependency) -> Option<&PinnedVersion> {
        self.entries
            .iter()
            .find(|(d, _)| d == dep)
            .map(|(_, v)| v)
    }

    /// Parse a resolved manifest from its textual contents.
    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        Self::parse_at(contents, Path::new("Cartfile.resolved"))
    }

    pub fn parse_at(contents: &str, path: &Path) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();
        for (idx, raw_line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = grammar::strip_trailing_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let parsed =
                grammar::parse_resolved_entry_line(line).map_err(|reason| ManifestError::ParseError {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason,
                })?;
            entries.push((parsed.dependency, PinnedVersion::new(parsed.pinned)));
        }
        // Already expected to be sorted on disk, but re-sort defensively: a hand-edited file
        // should still round-trip deterministically.
        Ok(Self::new(entries))
    }

    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Io(path.to_path_buf(), e))?;
        Self::parse_at(&contents, path)
    }

    /// Render this resolved manifest to its textual form, one sorted entry per line.
    pub fn to_string_pretty(&self) -> String {
        let mut out = String::new();
        for (dep, pinned) in &self.entries {
            out.push_str(&format!(
                "{} \"{}\" \"{}\"\n",
                dep.kind_str(),
                dep.location(),
                pinned
            ));
        }
        out
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), ManifestError> {
        std::fs::write(path, self.to_string_pretty())
            .map_err(|e| ManifestError::Io(path.to_path_buf(), e))
    }
}

/// The default manifest file name.
pub const CARTFILE_FILE_NAME: &str = "Cartfile";
/// The default resolved-manifest file name.
pub const CARTFILE_RESOLVED_FILE_NAME: &str = "Cartfile.resolved";

/// The path to the manifest within a project directory.
pub fn manifest_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CARTFILE_FILE_NAME)
}

/// The path to the resolved manifest within a project directory.
pub fn resolved_manifest_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CARTFILE_RESOLVED_FILE_NAME)
}
