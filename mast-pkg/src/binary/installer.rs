//! Binary framework installation: unpack, enumerate `*.framework` bundles, platform-detect,
//! collision/compatibility check, copy, and write the `.version` manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::InstallError;

use super::platform::{FrameworkInformationProvider, Platform, ToolchainId};

/// One installed framework's record in the `.version` manifest.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct InstalledArtifact {
    pub name: String,
    pub hash: Option<String>,
}

/// The `.<projectName>.version` manifest contents: a commit-ish plus one key per platform
/// mapping to the list of artifacts installed under that platform's directory.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct VersionManifest {
    pub commitish: String,
    #[serde(flatten)]
    pub platforms: BTreeMap<String, Vec<InstalledArtifact>>,
}

impl VersionManifest {
    pub fn to_json_pretty(&self) -> Result<String, InstallError> {
        serde_json::to_string_pretty(self).map_err(|e| InstallError::InternalError(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, InstallError> {
        serde_json::from_str(text).map_err(|e| InstallError::InternalError(e.to_string()))
    }
}

/// One `*.framework` bundle discovered inside an unpacked archive, before installation.
struct DiscoveredBundle {
    source_path: PathBuf,
    platform: Platform,
}

/// Recursively find every `*.framework` directory under `root`.
fn find_framework_bundles(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_type().is_dir() && entry.path().extension().and_then(|e| e.to_str()) == Some("framework")
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// The companion dSYM path for a framework bundle, if present in the unpacked tree.
fn sibling_dsym_path(bundle_path: &Path) -> Option<PathBuf> {
    let candidate = PathBuf::from(format!("{}.dSYM", bundle_path.display()));
    candidate.is_dir().then_some(candidate)
}

/// Every `*.bcsymbolmap` file anywhere under `root`, keyed by its stem parsed as a UUID.
fn collect_bcsymbolmaps(root: &Path) -> BTreeMap<Uuid, PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("bcsymbolmap"))
        .filter_map(|entry| {
            let stem = entry.path().file_stem()?.to_str()?.to_string();
            let uuid = Uuid::parse_str(&stem).ok()?;
            Some((uuid, entry.into_path()))
        })
        .collect()
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).into_iter().filter_map(Result::ok) {
        let relative = entry.path().strip_prefix(src).expect("walked entry is under src");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Unpacks `zip_file` and installs every compatible `*.framework` bundle (and its dSYM and
/// matching bcsymbolmaps) under `output_root`, writing the `.version` manifest.
///
/// Returns the temporary unpack directory's path after it has already been deleted — callers
/// only need it for diagnostics (the archive is fully materialized into `output_root` by the time
/// this returns successfully).
pub fn install(
    zip_file: &Path,
    project_name: &str,
    commitish: &str,
    output_root: &Path,
    toolchain: &ToolchainId,
    platform_provider: &dyn FrameworkInformationProvider,
) -> Result<PathBuf, InstallError> {
    let unpack_dir = tempfile::tempdir().map_err(InstallError::Io)?;
    unzip_into(zip_file, unpack_dir.path())?;

    let bundle_paths = find_framework_bundles(unpack_dir.path());
    let mut discovered = Vec::with_capacity(bundle_paths.len());
    for source_path in bundle_paths {
        let platform = platform_provider.detect_platform(&source_path)?;
        discovered.push(DiscoveredBundle { source_path, platform });
    }

    // Collision check: two distinct source bundles mapping to the same install path is a hard
    // failure before anything is copied.
    let mut by_dest: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for bundle in &discovered {
        let bundle_name = bundle
            .source_path
            .file_name()
            .ok_or_else(|| InstallError::InternalError("framework bundle has no file name".to_string()))?;
        let dest = output_root.join(bundle.platform.as_path_component()).join(bundle_name);
        by_dest.entry(dest).or_default().push(bundle.source_path.clone());
    }
    let duplicates: BTreeMap<PathBuf, Vec<PathBuf>> =
        by_dest.iter().filter(|(_, sources)| sources.len() > 1).map(|(k, v)| (k.clone(), v.clone())).collect();
    if !duplicates.is_empty() {
        return Err(InstallError::DuplicatesInArchive(duplicates));
    }

    // Compatibility check: incompatible bundles fail the whole install.
    for bundle in &discovered {
        if !platform_provider.is_compatible(&bundle.platform, toolchain) {
            return Err(InstallError::IncompatibleFramework {
                path: bundle.source_path.clone(),
                reason: format!("platform {} is not compatible with toolchain {}", bundle.platform, toolchain.0),
            });
        }
    }

    let all_bcsymbolmaps = collect_bcsymbolmaps(unpack_dir.path());
    let mut manifest = VersionManifest { commitish: commitish.to_string(), platforms: BTreeMap::new() };

    for bundle in &discovered {
        let bundle_name = bundle.source_path.file_name().expect("checked above").to_owned();
        let platform_dir = output_root.join(bundle.platform.as_path_component());
        let dest_bundle = platform_dir.join(&bundle_name);
        copy_dir_recursive(&bundle.source_path, &dest_bundle).map_err(InstallError::Io)?;
        let mut artifacts = vec![InstalledArtifact { name: bundle_name.to_string_lossy().into_owned(), hash: None }];

        if let Some(dsym_source) = sibling_dsym_path(&bundle.source_path) {
            let dsym_name = dsym_source.file_name().expect("sibling_dsym_path built from file_name").to_owned();
            let dest_dsym = platform_dir.join(&dsym_name);
            copy_dir_recursive(&dsym_source, &dest_dsym).map_err(InstallError::Io)?;
            artifacts.push(InstalledArtifact { name: dsym_name.to_string_lossy().into_owned(), hash: None });
        }

        let embedded_uuids = platform_provider.embedded_symbol_uuids(&bundle.source_path)?;
        for uuid in embedded_uuids {
            let Some(map_path) = all_bcsymbolmaps.get(&uuid) else { continue };
            let dest_map = platform_dir.join(format!("{uuid}.bcsymbolmap"));
            if let Some(parent) = dest_map.parent() {
                fs::create_dir_all(parent).map_err(InstallError::Io)?;
            }
            fs::copy(map_path, &dest_map).map_err(InstallError::Io)?;
            artifacts.push(InstalledArtifact { name: format!("{uuid}.bcsymbolmap"), hash: None });
        }

        manifest.platforms.entry(bundle.platform.0.clone()).or_default().extend(artifacts);
    }

    let version_file = output_root.join(format!(".{project_name}.version"));
    fs::create_dir_all(output_root).map_err(InstallError::Io)?;
    fs::write(&version_file, manifest.to_json_pretty()?).map_err(InstallError::Io)?;

    let unpack_path = unpack_dir.path().to_path_buf();
    // `unpack_dir` is dropped (and its directory removed) at the end of this scope.
    Ok(unpack_path)
}

fn unzip_into(zip_file: &Path, dest: &Path) -> Result<(), InstallError> {
    let file = fs::File::open(zip_file).map_err(InstallError::Io)?;
    let mut archive = zip::ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative_path) = entry.enclosed_name() else { continue };
        let out_path = dest.join(relative_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(InstallError::Io)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(InstallError::Io)?;
            }
            let mut out_file = fs::File::create(&out_path).map_err(InstallError::Io)?;
            std::io::copy(&mut entry, &mut out_file).map_err(InstallError::Io)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::platform::{FrameworkInformationProvider, Platform, ToolchainId};
    use std::sync::Mutex;

    struct StubProvider {
        platform: Platform,
        compatible: bool,
        uuids: Vec<Uuid>,
        calls: Mutex<usize>,
    }

    impl FrameworkInformationProvider for StubProvider {
        fn detect_platform(&self, _bundle_path: &Path) -> Result<Platform, InstallError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.platform.clone())
        }

        fn is_compatible(&self, _platform: &Platform, _toolchain: &ToolchainId) -> bool {
            self.compatible
        }

        fn embedded_symbol_uuids(&self, _bundle_path: &Path) -> Result<Vec<Uuid>, InstallError> {
            Ok(self.uuids.clone())
        }
    }

    fn write_zip_with_framework(path: &Path, framework_name: &str, dsym: bool) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory(format!("{framework_name}/"), options).unwrap();
        writer.start_file(format!("{framework_name}/{}", framework_name.trim_end_matches(".framework")), options).unwrap();
        std::io::Write::write_all(&mut writer, b"binary-contents").unwrap();
        if dsym {
            writer.add_directory(format!("{framework_name}.dSYM/"), options).unwrap();
            writer.start_file(format!("{framework_name}.dSYM/Info.plist"), options).unwrap();
            std::io::Write::write_all(&mut writer, b"<plist/>").unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn installs_framework_and_writes_version_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("archive.zip");
        write_zip_with_framework(&zip_path, "Foo.framework", true);
        let out_root = tmp.path().join("out");

        let provider = StubProvider {
            platform: Platform("ios-arm64".to_string()),
            compatible: true,
            uuids: Vec::new(),
            calls: Mutex::new(0),
        };
        let toolchain = ToolchainId("ios-17.2".to_string());
        install(&zip_path, "Foo", "1.2.3", &out_root, &toolchain, &provider).unwrap();

        assert!(out_root.join("ios-arm64/Foo.framework").is_dir());
        assert!(out_root.join("ios-arm64/Foo.framework.dSYM").is_dir());
        let manifest_text = fs::read_to_string(out_root.join(".Foo.version")).unwrap();
        let manifest = VersionManifest::from_json(&manifest_text).unwrap();
        assert_eq!(manifest.commitish, "1.2.3");
        assert_eq!(manifest.platforms["ios-arm64"].len(), 2);
    }

    fn write_zip_with_framework_at(writer: &mut zip::ZipWriter<fs::File>, prefix: &str, framework_name: &str) {
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory(format!("{prefix}/{framework_name}/"), options).unwrap();
        writer
            .start_file(format!("{prefix}/{framework_name}/{}", framework_name.trim_end_matches(".framework")), options)
            .unwrap();
        std::io::Write::write_all(writer, b"binary-contents").unwrap();
    }

    #[test]
    fn two_bundles_resolving_to_the_same_destination_fail_and_leave_output_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("archive.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        // Two distinct source bundles, both named `Foo.framework`, living under different
        // top-level prefixes: same platform + same bundle name means the same install path.
        write_zip_with_framework_at(&mut writer, "VendorA", "Foo.framework");
        write_zip_with_framework_at(&mut writer, "VendorB", "Foo.framework");
        writer.finish().unwrap();
        let out_root = tmp.path().join("out");

        let provider = StubProvider {
            platform: Platform("ios-arm64".to_string()),
            compatible: true,
            uuids: Vec::new(),
            calls: Mutex::new(0),
        };
        let toolchain = ToolchainId("ios-17.2".to_string());
        let err = install(&zip_path, "Foo", "1.2.3", &out_root, &toolchain, &provider).unwrap_err();
        assert!(matches!(err, InstallError::DuplicatesInArchive(_)));
        assert!(!out_root.exists());
    }

    #[test]
    fn incompatible_framework_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("archive.zip");
        write_zip_with_framework(&zip_path, "Foo.framework", false);
        let out_root = tmp.path().join("out");

        let provider = StubProvider {
            platform: Platform("macos".to_string()),
            compatible: false,
            uuids: Vec::new(),
            calls: Mutex::new(0),
        };
        let toolchain = ToolchainId("ios-17.2".to_string());
        let err = install(&zip_path, "Foo", "1.2.3", &out_root, &toolchain, &provider).unwrap_err();
        assert!(matches!(err, InstallError::IncompatibleFramework { .. }));
        assert!(!out_root.exists());
    }
}
