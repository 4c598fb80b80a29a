//! `.netrc` parsing and `Authorization` header resolution.
//!
//! A minimal parser for the host-indexed `machine <name> login <user> password <pass>` grammar;
//! real netrc files also support `default` and `macdef` entries, neither of which the binary
//! downloader needs.

use std::path::{Path, PathBuf};

use base64::Engine;

/// One `machine` entry.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    machine: String,
    login: String,
    password: String,
}

/// A parsed `.netrc` file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Netrc {
    entries: Vec<Entry>,
}

impl Netrc {
    pub fn parse(text: &str) -> Self {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut entries = Vec::new();
        let mut i = 0;
        let mut current: Option<(String, Option<String>, Option<String>)> = None;
        while i < tokens.len() {
            match tokens[i] {
                "machine" if i + 1 < tokens.len() => {
                    if let Some((machine, login, password)) = current.take() {
                        if let (Some(login), Some(password)) = (login, password) {
                            entries.push(Entry { machine, login, password });
                        }
                    }
                    current = Some((tokens[i + 1].to_string(), None, None));
                    i += 2;
                }
                "login" if i + 1 < tokens.len() => {
                    if let Some((_, login, _)) = current.as_mut() {
                        *login = Some(tokens[i + 1].to_string());
                    }
                    i += 2;
                }
                "password" if i + 1 < tokens.len() => {
                    if let Some((_, _, password)) = current.as_mut() {
                        *password = Some(tokens[i + 1].to_string());
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }
        if let Some((machine, login, password)) = current {
            if let (Some(login), Some(password)) = (login, password) {
                entries.push(Entry { machine, login, password });
            }
        }
        Self { entries }
    }

    /// Look up credentials for `host`, matched case-sensitively.
    fn credentials_for_host(&self, host: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|e| e.machine == host)
            .map(|e| (e.login.as_str(), e.password.as_str()))
    }

    /// Resolve an HTTP Basic `Authorization` header value for `host`, if an entry exists.
    pub fn authorization_header(&self, host: &str) -> Option<String> {
        let (login, password) = self.credentials_for_host(host)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{login}:{password}"));
        Some(format!("Basic {encoded}"))
    }
}

/// The default `.netrc` path, honoring a `NETRC` environment variable override.
pub fn default_netrc_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("NETRC") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".netrc"))
}

/// Load and parse the `.netrc` file at `path`, if it exists.
pub fn load(path: &Path) -> std::io::Result<Option<Netrc>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(Netrc::parse(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_machine_entries() {
        let netrc = Netrc::parse(
            "machine api.github.com login alice password s3cr3t\nmachine example.com login bob password hunter2\n",
        );
        assert_eq!(netrc.credentials_for_host("api.github.com"), Some(("alice", "s3cr3t")));
        assert_eq!(netrc.credentials_for_host("example.com"), Some(("bob", "hunter2")));
        assert_eq!(netrc.credentials_for_host("unknown.com"), None);
    }

    #[test]
    fn builds_basic_auth_header() {
        let netrc = Netrc::parse("machine api.github.com login alice password s3cr3t\n");
        let header = netrc.authorization_header("api.github.com").unwrap();
        assert!(header.starts_with("Basic "));
    }

    #[test]
    fn host_lookup_is_case_sensitive() {
        let netrc = Netrc::parse("machine api.github.com login alice password s3cr3t\n");
        assert_eq!(netrc.credentials_for_host("API.GITHUB.COM"), None);
    }
}
