//! Credentials for git network operations.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use super::error::{GitError, Result};
use crate::config::{GitAuthSettings, GitAuthType};
use crate::secrets::{expand_home, resolve_secret};

/// Escapes a value for use inside single-quoted shell strings.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Deletes the askpass script when dropped so the token never outlives the command.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for one git invocation.
///
/// Keep it alive until the child process has exited.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds the environment git needs to authenticate against the remote.
pub fn build_auth_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::plain(Vec::new())),
        GitAuthType::Token => token_env(auth),
        GitAuthType::Ssh => ssh_env(auth),
    }
}

fn token_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    let token = resolve_secret(auth.token.as_deref(), auth.token_file.as_deref())
        .map_err(|e| GitError::Auth(format!("Failed to resolve git token: {}", e)))?;

    let script = format!(
        "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
        shell_escape(&auth.username),
        shell_escape(token.expose_secret())
    );

    let path = std::env::temp_dir().join(format!(".git-askpass-{}.sh", uuid::Uuid::new_v4()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&path, &script)?;
    }

    let cleanup = AskpassCleanup::new(path.clone());
    let path_str = path
        .to_str()
        .ok_or_else(|| GitError::Auth("Temp directory path is not valid UTF-8".to_string()))?
        .to_string();

    Ok(AuthEnv {
        env_vars: vec![
            ("GIT_ASKPASS".to_string(), path_str),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        ],
        _cleanup: cleanup,
    })
}

fn ssh_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    let key_path = if auth.ssh_key_path.is_empty() {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("id_ed25519"))
            .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519"))
    } else {
        PathBuf::from(expand_home(&auth.ssh_key_path))
    };

    if !key_path.exists() {
        return Err(GitError::Auth(format!(
            "SSH key file not found: {}",
            key_path.display()
        )));
    }

    let escaped = shell_escape(&key_path.display().to_string());
    let quoted = if escaped.starts_with('-') {
        format!("'./{}'", escaped)
    } else {
        format!("'{}'", escaped)
    };

    Ok(AuthEnv::plain(vec![(
        "GIT_SSH_COMMAND".to_string(),
        format!("ssh -i {} -o StrictHostKeyChecking=accept-new", quoted),
    )]))
}
