//! Binary framework downloading: content-addressed caching of downloaded archives, plus a
//! release-host lookup path for `GitHub` dependencies opting into binary installs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::dependency::Dependency;
use crate::error::DownloadError;

use super::netrc::Netrc;

/// A single downloadable release asset, as returned by a release-host API query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseAsset {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub download_url: String,
}

/// A release matching a pinned version tag on a release host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Release {
    pub tag: String,
    pub draft: bool,
    pub assets: Vec<ReleaseAsset>,
}

/// Configuration governing which release assets are eligible for binary install.
pub struct ReleaseAssetFilter {
    /// Accepted content types (e.g. `"application/zip"`).
    pub allowed_content_types: Vec<String>,
    /// Substring an asset name must contain to be considered (e.g. the project name).
    pub name_pattern: String,
}

impl ReleaseAssetFilter {
    fn matches(&self, asset: &ReleaseAsset) -> bool {
        asset.name.contains(&self.name_pattern) && self.allowed_content_types.iter().any(|ct| ct == &asset.content_type)
    }
}

/// Injectable binary-framework downloader, so tests can substitute a fake network layer the same
/// way [`super::platform::FrameworkInformationProvider`] substitutes toolchain queries.
#[async_trait]
pub trait BinaryFrameworkDownloader: Send + Sync {
    async fn download_binary(
        &self,
        dependency: &Dependency,
        version: &str,
        url: &str,
        use_netrc: bool,
    ) -> Result<PathBuf, DownloadError>;

    async fn download_from_release_host(
        &self,
        dependency: &Dependency,
        pinned_version: &str,
        server: &str,
        repo: &str,
        filter: &ReleaseAssetFilter,
    ) -> Result<Vec<PathBuf>, DownloadError>;
}

/// `reqwest`-backed implementation. Archives are cached under
/// `<cacheRoot>/<dependency.name>/<version>/<filename>`; release-host assets cache under
/// `<cacheRoot>/<dependency.name>/<releaseTag>/<assetId>-<assetName>`.
pub struct HttpBinaryFrameworkDownloader {
    pub client: reqwest::Client,
    pub cache_root: PathBuf,
    pub netrc: Option<Netrc>,
}

/// Per-request HTTP timeout applied to every request this downloader issues, so a hung release
/// host or artifact server surfaces as a timeout error rather than hanging the install forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpBinaryFrameworkDownloader {
    pub fn new(cache_root: PathBuf, netrc: Option<Netrc>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, cache_root, netrc }
    }

    fn authorization_header(&self, url: &str, use_netrc: bool) -> Option<String> {
        if !use_netrc {
            return None;
        }
        let host = url::Url::parse(url).ok()?.host_str()?.to_string();
        self.netrc.as_ref()?.authorization_header(&host)
    }

    /// Download `url` into `dest_path` via a `.part` scratch file, finalized with an atomic
    /// rename (falling back to copy-and-delete on `EXDEV`). The copy-and-delete fallback is not
    /// itself atomic; a crash mid-copy can leave a partial file at `dest_path`.
    async fn download_to_cache_path(&self, url: &str, dest_path: &Path, use_netrc: bool) -> Result<(), DownloadError> {
        if dest_path.exists() {
            return Ok(());
        }
        let parent = dest_path.parent().ok_or_else(|| DownloadError::WriteFailed {
            url: url.to_string(),
            cause: "destination path has no parent directory".to_string(),
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() })?;

        let mut request = self.client.get(url);
        if let Some(auth) = self.authorization_header(url, use_netrc) {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::ReadFailed { url: url.to_string(), cause: e.to_string() })?;
        if !response.status().is_success() {
            return Err(DownloadError::ReadFailed {
                url: url.to_string(),
                cause: format!("unexpected status {}", response.status()),
            });
        }

        let scratch_path = dest_path.with_extension(
            dest_path.extension().map(|e| format!("{}.part", e.to_string_lossy())).unwrap_or_else(|| "part".to_string()),
        );
        {
            let mut scratch = tokio::fs::File::create(&scratch_path)
                .await
                .map_err(|e| DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() })?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DownloadError::ReadFailed { url: url.to_string(), cause: e.to_string() })?;
            scratch
                .write_all(&bytes)
                .await
                .map_err(|e| DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() })?;
            scratch
                .flush()
                .await
                .map_err(|e| DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() })?;
        }

        match tokio::fs::rename(&scratch_path, dest_path).await {
            Ok(()) => Ok(()),
            Err(e) if is_exdev(&e) => {
                tokio::fs::copy(&scratch_path, dest_path)
                    .await
                    .map_err(|e| DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() })?;
                let _ = tokio::fs::remove_file(&scratch_path).await;
                Ok(())
            }
            Err(e) => Err(DownloadError::WriteFailed { url: url.to_string(), cause: e.to_string() }),
        }
    }
}

#[cfg(unix)]
fn is_exdev(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc_exdev())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV on Linux and Darwin
}

#[cfg(not(unix))]
fn is_exdev(_e: &std::io::Error) -> bool {
    false
}

#[async_trait]
impl BinaryFrameworkDownloader for HttpBinaryFrameworkDownloader {
    async fn download_binary(
        &self,
        dependency: &Dependency,
        version: &str,
        url: &str,
        use_netrc: bool,
    ) -> Result<PathBuf, DownloadError> {
        let filename = url::Url::parse(url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(String::from)))
            .unwrap_or_else(|| "artifact".to_string());
        let dest_path = self.cache_root.join(dependency.name()).join(version).join(filename);
        self.download_to_cache_path(url, &dest_path, use_netrc).await?;
        Ok(dest_path)
    }

    async fn download_from_release_host(
        &self,
        dependency: &Dependency,
        pinned_version: &str,
        server: &str,
        repo: &str,
        filter: &ReleaseAssetFilter,
    ) -> Result<Vec<PathBuf>, DownloadError> {
        let release = fetch_release_tagged(&self.client, server, repo, pinned_version).await?;
        if release.draft {
            return Ok(Vec::new());
        }
        let matching: Vec<&ReleaseAsset> = release.assets.iter().filter(|a| filter.matches(a)).collect();
        let mut paths = Vec::with_capacity(matching.len());
        for asset in matching {
            let dest_path = self
                .cache_root
                .join(dependency.name())
                .join(&release.tag)
                .join(format!("{}-{}", asset.id, asset.name));
            self.download_to_cache_path(&asset.download_url, &dest_path, false).await?;
            paths.push(dest_path);
        }
        Ok(paths)
    }
}

/// Query the release-host API for the release tagged `tag`. Tries an authenticated request first
/// if a token is configured via environment, retrying once anonymously on an authentication
/// failure. A request timeout is never retried through: it's propagated immediately as
/// `ReleaseHostApiTimeout`, since a hung lookup is a fatal condition rather than one the
/// anonymous fallback (itself subject to the same hang) is likely to resolve.
async fn fetch_release_tagged(client: &reqwest::Client, server: &str, repo: &str, tag: &str) -> Result<Release, DownloadError> {
    let url = format!("https://api.{server}/repos/{repo}/releases/tags/{tag}");
    let token = std::env::var("MAST_RELEASE_HOST_TOKEN").ok();

    let response = if let Some(token) = &token {
        let result = client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(_) => client
                .get(&url)
                .send()
                .await
                .map_err(classify_request_error)?,
            Err(e) if e.is_timeout() => return Err(DownloadError::ReleaseHostApiTimeout),
            Err(_) => client
                .get(&url)
                .send()
                .await
                .map_err(classify_request_error)?,
        }
    } else {
        client.get(&url).send().await.map_err(classify_request_error)?
    };

    if response.status() == reqwest::StatusCode::REQUEST_TIMEOUT {
        return Err(DownloadError::ReleaseHostApiTimeout);
    }
    if !response.status().is_success() {
        return Err(DownloadError::ReleaseHostApiRequestFailed(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| DownloadError::ReleaseHostApiRequestFailed(e.to_string()))?;
    parse_release(&body).ok_or_else(|| DownloadError::ReleaseHostApiRequestFailed(format!("malformed release response for {url}")))
}

/// Distinguish a timed-out request from any other transport failure.
fn classify_request_error(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::ReleaseHostApiTimeout
    } else {
        DownloadError::ReleaseHostApiRequestFailed(e.to_string())
    }
}

fn parse_release(body: &serde_json::Value) -> Option<Release> {
    let tag = body.get("tag_name")?.as_str()?.to_string();
    let draft = body.get("draft").and_then(|v| v.as_bool()).unwrap_or(false);
    let assets = body
        .get("assets")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    Some(ReleaseAsset {
                        id: a.get("id")?.to_string(),
                        name: a.get("name")?.as_str()?.to_string(),
                        content_type: a.get("content_type")?.as_str()?.to_string(),
                        download_url: a.get("browser_download_url")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Release { tag, draft, assets })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_asset_filter_matches_name_and_content_type() {
        let filter = ReleaseAssetFilter {
            allowed_content_types: vec!["application/zip".to_string()],
            name_pattern: "MyFramework".to_string(),
        };
        let asset = ReleaseAsset {
            id: "1".into(),
            name: "MyFramework.zip".into(),
            content_type: "application/zip".into(),
            download_url: "https://example.com/a.zip".into(),
        };
        assert!(filter.matches(&asset));
        let mismatched = ReleaseAsset { name: "Other.zip".into(), ..asset };
        assert!(!filter.matches(&mismatched));
    }

    #[test]
    fn parses_release_json() {
        let body = serde_json::json!({
            "tag_name": "1.2.3",
            "draft": false,
            "assets": [
                {"id": 42, "name": "a.zip", "content_type": "application/zip", "browser_download_url": "https://example.com/a.zip"}
            ]
        });
        let release = parse_release(&body).unwrap();
        assert_eq!(release.tag, "1.2.3");
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].name, "a.zip");
    }

    #[test]
    fn draft_releases_parse_but_are_flagged() {
        let body = serde_json::json!({"tag_name": "1.0.0", "draft": true, "assets": []});
        let release = parse_release(&body).unwrap();
        assert!(release.draft);
    }
}
