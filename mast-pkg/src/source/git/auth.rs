//! Credential callback handling for non-interactive `git2` transports.
//!
//! Tries an SSH agent once, then the configured credential helper once, then the transport's own
//! default, surfacing an error instead of ever falling back to an interactive prompt.

pub(crate) struct AuthHandler {
    config: git2::Config,
    ssh_authentication_attempt: bool,
    plain_user_pass_attempt: bool,
}

impl AuthHandler {
    pub(crate) fn default_with_config(config: git2::Config) -> Self {
        Self {
            config,
            ssh_authentication_attempt: false,
            plain_user_pass_attempt: false,
        }
    }

    pub(crate) fn handle_callback(
        &mut self,
        url: &str,
        username: Option<&str>,
        allowed: git2::CredentialType,
    ) -> Result<git2::Cred, git2::Error> {
        if allowed.contains(git2::CredentialType::SSH_KEY) && !self.ssh_authentication_attempt {
            self.ssh_authentication_attempt = true;
            let username = username.ok_or_else(|| {
                git2::Error::from_str("username must be provided with SSH_KEY callback")
            })?;
            return git2::Cred::ssh_key_from_agent(username);
        }
        if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) && !self.plain_user_pass_attempt {
            self.plain_user_pass_attempt = true;
            return git2::Cred::credential_helper(&self.config, url, username);
        }
        if allowed.contains(git2::CredentialType::DEFAULT) {
            return git2::Cred::default();
        }
        Err(git2::Error::from_str(
            "tried all possible credential types for authentication",
        ))
    }
}
