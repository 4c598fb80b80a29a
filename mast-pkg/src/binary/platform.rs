//! Platform/ABI detection for installed framework bundles.
//!
//! Detection order per bundle: an XCFramework manifest if present, else the bundle's Info plist,
//! else a toolchain object-dump fallback. This is injectable behind [`FrameworkInformationProvider`]
//! rather than hard-coded, so the installer never bakes toolchain queries directly into its own
//! logic.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::InstallError;

/// A toolchain-relative platform identifier, e.g. `ios-arm64`, `ios-arm64-simulator`.
/// Also used as the path component under the install root.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Platform(pub String);

impl Platform {
    pub fn as_path_component(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque identifier for the toolchain being installed for (e.g. `"xcode-15.2"`), used only to
/// query compatibility; callers don't need to interpret it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolchainId(pub String);

/// Injectable source of framework/platform facts, so the installer doesn't hard-code how a
/// bundle's target platform or embedded symbol UUIDs are discovered.
pub trait FrameworkInformationProvider: Send + Sync {
    /// Determine the platform a `*.framework` bundle at `bundle_path` was built for.
    fn detect_platform(&self, bundle_path: &Path) -> Result<Platform, InstallError>;

    /// Whether `platform` is usable with `toolchain`.
    fn is_compatible(&self, platform: &Platform, toolchain: &ToolchainId) -> bool;

    /// UUIDs of the debug-symbol slices embedded in the bundle's executable.
    fn embedded_symbol_uuids(&self, bundle_path: &Path) -> Result<Vec<uuid::Uuid>, InstallError>;
}

/// Default provider: XCFramework manifest (`Info.plist` at the XCFramework root listing
/// per-library identifiers) → per-bundle `Info.plist`'s `DTPlatformName`/`CFBundleSupportedPlatforms`
/// → `object_dump_tool` fallback that shells out to parse the embedded platform load command.
pub struct DefaultFrameworkInformationProvider {
    /// Path to an object-dump style tool (e.g. `otool`), invoked only when plist-based detection
    /// yields nothing.
    pub object_dump_tool: PathBuf,
}

impl DefaultFrameworkInformationProvider {
    pub fn new(object_dump_tool: impl Into<PathBuf>) -> Self {
        Self { object_dump_tool: object_dump_tool.into() }
    }

    fn xcframework_root(bundle_path: &Path) -> Option<PathBuf> {
        let parent = bundle_path.parent()?;
        let manifest = parent.join("Info.plist");
        if parent.extension().and_then(|e| e.to_str()) == Some("xcframework") && manifest.is_file() {
            Some(parent.to_path_buf())
        } else {
            None
        }
    }

    fn platform_from_xcframework_manifest(root: &Path, bundle_path: &Path) -> Result<Option<Platform>, InstallError> {
        let manifest_path = root.join("Info.plist");
        let value: plist::Value = plist::from_file(&manifest_path).map_err(|e| InstallError::IncompatibleFramework {
            path: bundle_path.to_path_buf(),
            reason: format!("failed to parse XCFramework manifest {}: {e}", manifest_path.display()),
        })?;
        let Some(dict) = value.as_dictionary() else {
            return Ok(None);
        };
        let Some(libraries) = dict.get("AvailableLibraries").and_then(|v| v.as_array()) else {
            return Ok(None);
        };
        let bundle_name = bundle_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        for library in libraries {
            let Some(lib_dict) = library.as_dictionary() else { continue };
            let matches_this_bundle = lib_dict
                .get("LibraryPath")
                .and_then(|v| v.as_string())
                .map(|s| s == bundle_name)
                .unwrap_or(false);
            if !matches_this_bundle {
                continue;
            }
            let platform = lib_dict.get("SupportedPlatform").and_then(|v| v.as_string());
            let variant = lib_dict.get("SupportedPlatformVariant").and_then(|v| v.as_string());
            if let Some(platform) = platform {
                let identifier = match variant {
                    Some(variant) => format!("{platform}-{variant}"),
                    None => platform.to_string(),
                };
                return Ok(Some(Platform(identifier)));
            }
        }
        Ok(None)
    }

    fn platform_from_info_plist(bundle_path: &Path) -> Result<Option<Platform>, InstallError> {
        let plist_path = bundle_path.join("Info.plist");
        if !plist_path.is_file() {
            return Ok(None);
        }
        let value: plist::Value = plist::from_file(&plist_path).map_err(|e| InstallError::IncompatibleFramework {
            path: bundle_path.to_path_buf(),
            reason: format!("failed to parse Info.plist {}: {e}", plist_path.display()),
        })?;
        let Some(dict) = value.as_dictionary() else {
            return Ok(None);
        };
        if let Some(name) = dict.get("DTPlatformName").and_then(|v| v.as_string()) {
            return Ok(Some(Platform(name.to_string())));
        }
        if let Some(array) = dict.get("CFBundleSupportedPlatforms").and_then(|v| v.as_array()) {
            if let Some(first) = array.first().and_then(|v| v.as_string()) {
                return Ok(Some(Platform(first.to_string())));
            }
        }
        Ok(None)
    }

    fn executable_path(bundle_path: &Path) -> Option<PathBuf> {
        let name = bundle_path.file_stem()?.to_str()?;
        let candidate = bundle_path.join(name);
        candidate.is_file().then_some(candidate)
    }
}

impl FrameworkInformationProvider for DefaultFrameworkInformationProvider {
    fn detect_platform(&self, bundle_path: &Path) -> Result<Platform, InstallError> {
        if let Some(root) = Self::xcframework_root(bundle_path) {
            if let Some(platform) = Self::platform_from_xcframework_manifest(&root, bundle_path)? {
                return Ok(platform);
            }
        }
        if let Some(platform) = Self::platform_from_info_plist(bundle_path)? {
            return Ok(platform);
        }
        let Some(executable) = Self::executable_path(bundle_path) else {
            return Err(InstallError::IncompatibleFramework {
                path: bundle_path.to_path_buf(),
                reason: "bundle has no executable to object-dump".to_string(),
            });
        };
        let output = Command::new(&self.object_dump_tool)
            .arg("-l")
            .arg(&executable)
            .output()
            .map_err(|e| InstallError::IncompatibleFramework {
                path: bundle_path.to_path_buf(),
                reason: format!("failed to invoke object-dump tool: {e}"),
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        parse_platform_load_command(&text).ok_or_else(|| InstallError::IncompatibleFramework {
            path: bundle_path.to_path_buf(),
            reason: "no platform version load command found in object-dump output".to_string(),
        })
    }

    fn is_compatible(&self, platform: &Platform, toolchain: &ToolchainId) -> bool {
        // The toolchain identifier's prefix before the last '-' names the SDK family
        // (e.g. "ios-17.2" is compatible with platform "ios" or "ios-simulator").
        let family = toolchain.0.split('-').next().unwrap_or(&toolchain.0);
        platform.0 == *family || platform.0.starts_with(&format!("{family}-"))
    }

    fn embedded_symbol_uuids(&self, bundle_path: &Path) -> Result<Vec<uuid::Uuid>, InstallError> {
        let Some(executable) = Self::executable_path(bundle_path) else {
            return Ok(Vec::new());
        };
        let output = Command::new(&self.object_dump_tool)
            .arg("-l")
            .arg(&executable)
            .output()
            .map_err(|e| InstallError::IncompatibleFramework {
                path: bundle_path.to_path_buf(),
                reason: format!("failed to invoke object-dump tool: {e}"),
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_uuid_load_commands(&text))
    }
}

/// Parse an `LC_VERSION_MIN_*`/`LC_BUILD_VERSION`-style `otool -l` line of the form
/// `platform IOS` into a [`Platform`].
fn parse_platform_load_command(text: &str) -> Option<Platform> {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("platform ") {
            return Some(Platform(rest.trim().to_lowercase()));
        }
    }
    None
}

/// Parse `uuid XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` lines from `otool -l` output.
fn parse_uuid_load_commands(text: &str) -> Vec<uuid::Uuid> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            trimmed.strip_prefix("uuid ").and_then(|rest| uuid::Uuid::parse_str(rest.trim()).ok())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_platform_line() {
        let output = "Load command 3\n      cmd LC_BUILD_VERSION\n  platform IOS\n   sdk 17.2\n";
        assert_eq!(parse_platform_load_command(output), Some(Platform("ios".to_string())));
    }

    #[test]
    fn parses_uuid_lines() {
        let output = "Load command 1\n     cmd LC_UUID\n    uuid 4D3B2C1A-5E6F-7890-ABCD-EF1234567890\n";
        let uuids = parse_uuid_load_commands(output);
        assert_eq!(uuids.len(), 1);
    }

    #[test]
    fn compatibility_matches_family_prefix() {
        let provider = DefaultFrameworkInformationProvider::new("otool");
        let platform = Platform("ios-simulator".to_string());
        assert!(provider.is_compatible(&platform, &ToolchainId("ios-17.2".to_string())));
        assert!(!provider.is_compatible(&platform, &ToolchainId("macos-14.0".to_string())));
    }
}
