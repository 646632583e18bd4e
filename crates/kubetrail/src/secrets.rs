//! Git credential resolution.
//!
//! Credentials come from one of two places, in priority order:
//!
//! 1. **Direct value** - e.g. `GIT_HTTPS_TOKEN` injected from a Kubernetes Secret
//! 2. **File reference** - e.g. `GIT_TOKEN_FILE=/var/run/secrets/git/token`

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need a direct value or a file path)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Secret file '{path}' is empty")]
    EmptyFile { path: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a direct value, falling back to the contents of a file.
///
/// Empty strings count as "not provided". File contents are trimmed, since
/// mounted secrets commonly carry a trailing newline.
pub fn resolve_secret(direct: Option<&str>, file_path: Option<&str>) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                path: expanded.clone(),
                source: e,
            })?;
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(SecretError::EmptyFile { path: expanded });
            }
            return Ok(SecretString::from(trimmed.to_string()));
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(direct: Option<&str>, file_path: Option<&str>) -> bool {
    direct.is_some_and(|s| !s.is_empty()) || file_path.is_some_and(|s| !s.is_empty())
}

/// Expands a leading `~` to the current user's home directory.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
