//! Binary project definitions: the JSON document a `Binary` dependency's URL resolves to,
//! mapping each published version string to the URL of its archive.

use std::collections::BTreeMap;

use url::Url;

use crate::error::DownloadError;
use crate::version::{PinnedVersion, SemanticVersion};

/// `{ "<version>": "<artifact-url>", ... }`. Unknown keys are tolerated — there aren't any in the
/// format beyond the version map itself, but a stray top-level key shouldn't be a hard parse
/// failure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BinaryProject {
    versions: BTreeMap<String, Url>,
}

impl BinaryProject {
    /// Parse a binary project definition from its raw JSON text.
    pub fn parse(url: &str, text: &str) -> Result<Self, DownloadError> {
        let raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| DownloadError::InvalidBinaryJson {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let mut versions = BTreeMap::new();
        for (version, value) in raw {
            let Some(artifact_url) = value.as_str() else {
                continue;
            };
            let parsed = Url::parse(artifact_url).map_err(|e| DownloadError::InvalidBinaryJson {
                url: url.to_string(),
                reason: format!("invalid artifact URL for version {version:?}: {e}"),
            })?;
            versions.insert(version, parsed);
        }
        Ok(Self { versions })
    }

    /// All published version strings, newest-first where they parse as semantic versions,
    /// non-parseable ones trailing in declaration order.
    pub fn versions_newest_first(&self) -> Vec<PinnedVersion> {
        let mut parseable: Vec<(SemanticVersion, String)> = Vec::new();
        let mut unparseable: Vec<String> = Vec::new();
        for version in self.versions.keys() {
            match SemanticVersion::parse(version) {
                Ok(sem) => parseable.push((sem, version.clone())),
                Err(_) => unparseable.push(version.clone()),
            }
        }
        parseable.sort_by(|a, b| b.0.cmp(&a.0));
        parseable
            .into_iter()
            .map(|(_, v)| PinnedVersion::new(v))
            .chain(unparseable.into_iter().map(PinnedVersion::new))
            .collect()
    }

    pub fn artifact_url(&self, version: &str) -> Option<&Url> {
        self.versions.get(version)
    }
}

/// Fetch and parse the binary project definition at `url`.
pub async fn fetch_binary_project_definition(client: &reqwest::Client, url: &str) -> Result<BinaryProject, DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::ReadFailed { url: url.to_string(), cause: e.to_string() })?;
    if !response.status().is_success() {
        return Err(DownloadError::ReadFailed {
            url: url.to_string(),
            cause: format!("unexpected status {}", response.status()),
        });
    }
    let text = response
        .text()
        .await
        .map_err(|e| DownloadError::ReadFailed { url: url.to_string(), cause: e.to_string() })?;
    BinaryProject::parse(url, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_map_and_sorts_descending() {
        let json = r#"{
            "1.0.0": "https://example.com/a-1.0.0.zip",
            "2.0.0": "https://example.com/a-2.0.0.zip",
            "1.5.0": "https://example.com/a-1.5.0.zip"
        }"#;
        let project = BinaryProject::parse("https://example.com/proj.json", json).unwrap();
        let versions = project.versions_newest_first();
        assert_eq!(
            versions.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            vec!["2.0.0", "1.5.0", "1.0.0"]
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let err = BinaryProject::parse("https://example.com/proj.json", "not json").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidBinaryJson { .. }));
    }

    #[test]
    fn non_semver_keys_are_kept_but_sort_last() {
        let json = r#"{ "1.0.0": "https://example.com/a.zip", "latest": "https://example.com/b.zip" }"#;
        let project = BinaryProject::parse("https://example.com/proj.json", json).unwrap();
        let versions: Vec<String> = project.versions_newest_first().iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, vec!["1.0.0", "latest"]);
    }
}
