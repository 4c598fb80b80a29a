//! The git mirror: a content-addressed local cache of bare clones, with non-interactive
//! fetch/checkout and submodule discovery on top of `git2` (vendored libgit2), with advisory
//! `fd_lock` guards around the checkout path and a clean split between the bare mirror and any
//! materialized working tree.

mod auth;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::GitError;

use super::fetch_cache::FetchCache;

const DEFAULT_REMOTE_NAME: &str = "origin";

/// One entry of a repository's `.gitmodules` at a given revision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmoduleEntry {
    pub name: String,
    pub path: String,
    pub url: String,
    pub sha: String,
}

/// A content-addressed local mirror of upstream git repositories, laid out under
/// `repositories/<urlHash>`.
pub struct GitMirror {
    cache_root: PathBuf,
    fetch_cache: Arc<FetchCache>,
}

impl GitMirror {
    pub fn new(cache_root: PathBuf, fetch_cache: Arc<FetchCache>) -> Self {
        Self { cache_root, fetch_cache }
    }

    /// The bare-mirror directory for `url`, named by a hash of the URL.
    pub fn mirror_path(&self, url: &str) -> PathBuf {
        self.cache_root.join(mast_util::hash_string(url))
    }

    /// Clone `url` into the mirror if it doesn't exist yet; otherwise fetch (with `--prune` and
    /// tags) only if the fetch cache says the mirror is stale. Returns the mirror's path either
    /// way.
    pub async fn clone_or_fetch(&self, url: &str) -> Result<PathBuf, GitError> {
        let path = self.mirror_path(url);
        let url = url.to_string();
        let needs_fetch = !path.exists() || self.fetch_cache.needs_fetch(&url);
        if needs_fetch {
            let path_for_blocking = path.clone();
            let url_for_blocking = url.clone();
            tokio::task::spawn_blocking(move || clone_or_fetch_blocking(&path_for_blocking, &url_for_blocking))
                .await
                .map_err(|e| GitError::RepositoryCheckoutFailed {
                    dir: path.clone(),
                    reason: format!("mirror task panicked: {e}"),
                })??;
            self.fetch_cache.mark_fetched(&url);
        }
        Ok(path)
    }

    /// Tags present in the mirror, reverse-chronological by the commit they point at.
    pub async fn list_tags(&self, url: &str) -> Result<Vec<String>, GitError> {
        let path = self.clone_or_fetch(url).await?;
        tokio::task::spawn_blocking(move || list_tags_blocking(&path))
            .await
            .map_err(|e| GitError::RepositoryCheckoutFailed {
                dir: PathBuf::new(),
                reason: format!("list-tags task panicked: {e}"),
            })?
    }

    /// Resolve a reference (branch, tag, or commit-ish) to its full commit SHA.
    pub async fn resolve_reference(&self, url: &str, reference: &str) -> Result<String, GitError> {
        let path = self.clone_or_fetch(url).await?;
        let reference = reference.to_string();
        tokio::task::spawn_blocking(move || resolve_reference_blocking(&path, &reference))
            .await
            .map_err(|e| GitError::RepositoryCheckoutFailed {
                dir: PathBuf::new(),
                reason: format!("resolve-reference task panicked: {e}"),
            })?
    }

    /// Read the contents of `path` as it existed at `revision`, without materializing a working
    /// tree.
    pub async fn contents_at_revision(&self, url: &str, path: &str, revision: &str) -> Result<Vec<u8>, GitError> {
        let mirror_path = self.clone_or_fetch(url).await?;
        let path = path.to_string();
        let revision = revision.to_string();
        tokio::task::spawn_blocking(move || contents_at_revision_blocking(&mirror_path, &path, &revision))
            .await
            .map_err(|e| GitError::RepositoryCheckoutFailed {
                dir: PathBuf::new(),
                reason: format!("read-blob task panicked: {e}"),
            })?
    }

    /// Enumerate the submodules declared at `revision`, resolving each one's pinned SHA via the
    /// commit's tree (the gitlink entry) rather than a separate `ls-tree` subprocess.
    pub async fn submodules_at_revision(&self, url: &str, revision: &str) -> Result<Vec<SubmoduleEntry>, GitError> {
        let gitmodules = match self.contents_at_revision(url, ".gitmodules", revision).await {
            Ok(bytes) => bytes,
            Err(GitError::RepositoryCheckoutFailed { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8(gitmodules).map_err(|e| GitError::SubmoduleParseFailed {
            repo: url.to_string(),
            reason: format!("`.gitmodules` is not valid UTF-8: {e}"),
        })?;
        let declarations = parse_gitmodules(&text).map_err(|reason| GitError::SubmoduleParseFailed {
            repo: url.to_string(),
            reason,
        })?;

        let mirror_path = self.clone_or_fetch(url).await?;
        let revision = revision.to_string();
        let shas = {
            let mirror_path = mirror_path.clone();
            let paths: Vec<String> = declarations.iter().map(|d| d.path.clone()).collect();
            tokio::task::spawn_blocking(move || gitlink_shas_blocking(&mirror_path, &revision, &paths))
                .await
                .map_err(|e| GitError::RepositoryCheckoutFailed {
                    dir: mirror_path.clone(),
                    reason: format!("submodule gitlink task panicked: {e}"),
                })??
        };

        Ok(declarations
            .into_iter()
            .zip(shas)
            .filter_map(|(decl, sha)| sha.map(|sha| SubmoduleEntry { name: decl.name, path: decl.path, url: decl.url, sha }))
            .collect())
    }

    /// Materialize a working tree at `working_tree`, checked out to `revision`.
    pub async fn checkout(&self, url: &str, working_tree: &Path, revision: &str, force: bool) -> Result<(), GitError> {
        let mirror_path = self.clone_or_fetch(url).await?;
        let working_tree = working_tree.to_path_buf();
        let revision = revision.to_string();
        tokio::task::spawn_blocking(move || checkout_blocking(&mirror_path, &working_tree, &revision, force))
            .await
            .map_err(|e| GitError::RepositoryCheckoutFailed {
                dir: working_tree.clone(),
                reason: format!("checkout task panicked: {e}"),
            })?
    }
}

fn remote_callbacks() -> git2::RemoteCallbacks<'static> {
    // Vendored libgit2/libssh2 never shells out to `git`/`ssh`, so there's no
    // `GIT_TERMINAL_PROMPT`/`GIT_SSH_COMMAND` for it to honor. Non-interactivity comes from this
    // callback chain itself: SSH agent, then the credential helper, then the transport default,
    // erroring out rather than prompting if none of those satisfy the request.
    let config = git2::Config::open_default().unwrap_or_else(|_| git2::Config::new().expect("in-memory git2 config"));
    let mut auth_handler = auth::AuthHandler::default_with_config(config);
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| auth_handler.handle_callback(url, username, allowed));
    callbacks
}

fn clone_or_fetch_blocking(mirror_path: &Path, url: &str) -> Result<(), GitError> {
    let _lock = mast_util::path_lock(mirror_path).map_err(|e| GitError::RepositoryCheckoutFailed {
        dir: mirror_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let refspecs = [
        "+refs/heads/*:refs/heads/*".to_string(),
        "+refs/tags/*:refs/tags/*".to_string(),
    ];

    if !mirror_path.exists() {
        std::fs::create_dir_all(mirror_path).map_err(GitError::Io)?;
        let repo = git2::Repository::init_bare(mirror_path)?;
        let mut fetch_opts = git2::FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks());
        fetch_opts.download_tags(git2::AutotagOption::All);
        repo.remote_anonymous(url)?
            .fetch(&refspecs, Some(&mut fetch_opts), None)
            .map_err(|source| GitError::CloneOrFetchFailed { url: url.to_string(), source })?;
    } else {
        let repo = git2::Repository::open_bare(mirror_path)?;
        let mut remote = repo
            .find_remote(DEFAULT_REMOTE_NAME)
            .or_else(|_| repo.remote_anonymous(url))?;
        let mut fetch_opts = git2::FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks());
        fetch_opts.download_tags(git2::AutotagOption::All);
        fetch_opts.prune(git2::FetchPrune::On);
        remote
            .fetch(&refspecs, Some(&mut fetch_opts), None)
            .map_err(|source| GitError::CloneOrFetchFailed { url: url.to_string(), source })?;
    }
    Ok(())
}

fn list_tags_blocking(mirror_path: &Path) -> Result<Vec<String>, GitError> {
    let repo = git2::Repository::open_bare(mirror_path)?;
    let tag_names = repo.tag_names(None)?;
    let mut tags_with_time: Vec<(String, i64)> = Vec::new();
    for name in tag_names.iter().flatten() {
        let refname = format!("refs/tags/{name}");
        if let Ok(oid) = repo.refname_to_id(&refname) {
            if let Ok(obj) = repo.find_object(oid, None) {
                if let Ok(commit) = obj.peel(git2::ObjectType::Commit) {
                    let time = commit.as_commit().map(|c| c.time().seconds()).unwrap_or(0);
                    tags_with_time.push((name.to_string(), time));
                }
            }
        }
    }
    tags_with_time.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(tags_with_time.into_iter().map(|(name, _)| name).collect())
}

fn resolve_reference_blocking(mirror_path: &Path, reference: &str) -> Result<String, GitError> {
    let repo = git2::Repository::open_bare(mirror_path)?;
    resolve_in(&repo, reference).ok_or_else(|| GitError::GitReferenceNotFound(reference.to_string()))
}

fn resolve_in(repo: &git2::Repository, reference: &str) -> Option<String> {
    let candidates = [
        format!("refs/tags/{reference}"),
        format!("refs/heads/{reference}"),
        reference.to_string(),
    ];
    for candidate in candidates {
        if let Ok(obj) = repo.revparse_single(&candidate) {
            if let Ok(commit) = obj.peel(git2::ObjectType::Commit) {
                return Some(commit.id().to_string());
            }
        }
    }
    None
}

fn contents_at_revision_blocking(mirror_path: &Path, path: &str, revision: &str) -> Result<Vec<u8>, GitError> {
    let repo = git2::Repository::open_bare(mirror_path)?;
    let sha = resolve_in(&repo, revision).ok_or_else(|| GitError::GitReferenceNotFound(revision.to_string()))?;
    let oid = git2::Oid::from_str(&sha)?;
    let commit = repo.find_commit(oid)?;
    let tree = commit.tree()?;
    let entry = tree.get_path(Path::new(path)).map_err(|_| GitError::RepositoryCheckoutFailed {
        dir: mirror_path.to_path_buf(),
        reason: format!("{path} not found at {revision}"),
    })?;
    let blob = repo.find_blob(entry.id())?;
    Ok(blob.content().to_vec())
}

fn gitlink_shas_blocking(mirror_path: &Path, revision: &str, paths: &[String]) -> Result<Vec<Option<String>>, GitError> {
    let repo = git2::Repository::open_bare(mirror_path)?;
    let sha = resolve_in(&repo, revision).ok_or_else(|| GitError::GitReferenceNotFound(revision.to_string()))?;
    let oid = git2::Oid::from_str(&sha)?;
    let commit = repo.find_commit(oid)?;
    let tree = commit.tree()?;
    Ok(paths
        .iter()
        .map(|path| tree.get_path(Path::new(path)).ok().map(|entry| entry.id().to_string()))
        .collect())
}

fn checkout_blocking(mirror_path: &Path, working_tree: &Path, revision: &str, force: bool) -> Result<(), GitError> {
    let _lock = mast_util::path_lock(working_tree).map_err(|e| GitError::RepositoryCheckoutFailed {
        dir: working_tree.to_path_buf(),
        reason: e.to_string(),
    })?;
    let repo = git2::Repository::open_bare(mirror_path)?;
    let sha = resolve_in(&repo, revision).ok_or_else(|| GitError::GitReferenceNotFound(revision.to_string()))?;
    let oid = git2::Oid::from_str(&sha)?;
    let object = repo.find_object(oid, None)?;

    std::fs::create_dir_all(working_tree).map_err(GitError::Io)?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.target_dir(working_tree);
    if force {
        checkout.force();
    }
    repo.checkout_tree(&object, Some(&mut checkout))
        .map_err(|e| GitError::RepositoryCheckoutFailed { dir: working_tree.to_path_buf(), reason: e.to_string() })?;
    Ok(())
}

struct SubmoduleDeclaration {
    name: String,
    path: String,
    url: String,
}

static SUBMODULE_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\[submodule\s+"([^"]+)"\]"#).expect("valid regex"));
static SUBMODULE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*path\s*=\s*(\S+)\s*$").expect("valid regex"));
static SUBMODULE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*url\s*=\s*(\S+)\s*$").expect("valid regex"));

/// Parse the `[submodule "name"] path = ... url = ...` sections of a `.gitmodules` blob.
fn parse_gitmodules(text: &str) -> Result<Vec<SubmoduleDeclaration>, String> {
    let section_starts: Vec<(usize, String)> = SUBMODULE_SECTION
        .captures_iter(text)
        .map(|c| (c.get(0).unwrap().start(), c[1].to_string()))
        .collect();
    let mut declarations = Vec::new();
    for (idx, (start, name)) in section_starts.iter().enumerate() {
        let end = section_starts.get(idx + 1).map(|(s, _)| *s).unwrap_or(text.len());
        let body = &text[*start..end];
        let path = SUBMODULE_PATH
            .captures(body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| format!("submodule {name:?} has no `path` entry"))?;
        let url = SUBMODULE_URL
            .captures(body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| format!("submodule {name:?} has no `url` entry"))?;
        declarations.push(SubmoduleDeclaration { name: name.clone(), path, url });
    }
    Ok(declarations)
}
