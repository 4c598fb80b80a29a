//! The dependency model: tagged source locations and the manifest's in-memory representation.
//!
//! Three source kinds: an arbitrary `Git` remote, a `GitHub`-hosted repository identified by
//! owner/repo, and a `Binary` dependency whose project definition lives at a URL.

use std::fmt;
use url::Url;

/// A single named external source a project depends on.
///
/// Equality is structural; `name` is derived from the URL path and is stable across the life of
/// one resolution.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Dependency {
    /// A dependency fetched from an arbitrary git remote.
    Git { url: String },
    /// A dependency hosted on a release host (e.g. a forge), identified by owner/repo.
    GitHub {
        server: String,
        owner: String,
        repo: String,
    },
    /// A dependency whose binary project definition is fetched directly from a URL.
    Binary { url: String },
}

impl Dependency {
    /// The stable name used to key this dependency for caching, locking, and diagnostics.
    ///
    /// Derived from the final path component of the dependency's URL, with a `.git` suffix and
    /// any `.json` extension stripped.
    pub fn name(&self) -> String {
        match self {
            Dependency::Git { url } => name_from_url_path(url),
            Dependency::GitHub { owner: _, repo, .. } => repo.clone(),
            Dependency::Binary { url } => name_from_url_path(url),
        }
    }

    /// The URL at which this dependency's source (or binary project definition) is located.
    pub fn location(&self) -> String {
        match self {
            Dependency::Git { url } => url.clone(),
            Dependency::GitHub {
                server,
                owner,
                repo,
            } => format!("{server}/{owner}/{repo}"),
            Dependency::Binary { url } => url.clone(),
        }
    }

    /// For `GitHub` dependencies, the URL of the underlying git remote used for cloning.
    pub fn git_clone_url(&self) -> Option<String> {
        match self {
            Dependency::Git { url } => Some(url.clone()),
            Dependency::GitHub {
                server,
                owner,
                repo,
            } => Some(format!("https://{server}/{owner}/{repo}.git")),
            Dependency::Binary { .. } => None,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Dependency::Git { .. } => "git",
            Dependency::GitHub { .. } => "github",
            Dependency::Binary { .. } => "binary",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Git { url } => write!(f, "git \"{url}\""),
            Dependency::GitHub { owner, repo, .. } => write!(f, "github \"{owner}/{repo}\""),
            Dependency::Binary { url } => write!(f, "binary \"{url}\""),
        }
    }
}

/// Derives a dependency name from the final non-empty path component of a URL, stripping a
/// trailing `.git` or `.json` extension.
fn name_from_url_path(url: &str) -> String {
    let path = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
        })
        .unwrap_or_else(|| {
            url.rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or(url)
                .to_string()
        });
    let path = path.strip_suffix(".git").unwrap_or(&path);
    let path = path.strip_suffix(".json").unwrap_or(path);
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_derivation_strips_extensions() {
        assert_eq!(
            Dependency::Git {
                url: "https://example.com/foo/bar.git".into()
            }
            .name(),
            "bar"
        );
        assert_eq!(
            Dependency::Binary {
                url: "https://example.com/artifacts/baz.json".into()
            }
            .name(),
            "baz"
        );
        assert_eq!(
            Dependency::GitHub {
                server: "github.com".into(),
                owner: "o".into(),
                repo: "A".into(),
            }
            .name(),
            "A"
        );
    }

    #[test]
    fn github_clone_url_targets_default_server() {
        let dep = Dependency::GitHub {
            server: "github.com".into(),
            owner: "o".into(),
            repo: "A".into(),
        };
        assert_eq!(
            dep.git_clone_url().as_deref(),
            Some("https://github.com/o/A.git")
        );
    }
}
