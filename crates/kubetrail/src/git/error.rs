use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git operation failed: {0}")]
    Operation(String),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git operation timed out after {0}s")]
    Timeout(u64),

    #[error("Git conflict: {0}")]
    Conflict(String),

    #[error("Git authentication failed: {0}")]
    Auth(String),

    #[error("Git repository not initialized")]
    NotInitialized,

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GitError::Network(_) | GitError::Timeout(_))
    }

    /// True when a push was refused because the remote has commits we lack.
    pub fn is_rejected_push(&self) -> bool {
        match self {
            GitError::Operation(message) => {
                let lower = message.to_lowercase();
                lower.contains("[rejected]")
                    || lower.contains("non-fast-forward")
                    || lower.contains("fetch first")
            }
            _ => false,
        }
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(message);
    }

    if lower.contains("merge conflict")
        || lower.contains("could not apply")
        || (lower.contains("conflict") && (lower.contains("merge") || lower.contains("rebase")))
    {
        return GitError::Conflict(message);
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitError::Auth(message);
    }

    GitError::Operation(message)
}

pub type Result<T> = std::result::Result<T, GitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error("fatal: unable to access 'https://x/': Could not resolve host: x");
        assert!(matches!(err, GitError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_conflict() {
        let err = classify_git_error(
            "error: could not apply 1a2b3c... update\nCONFLICT (content): Merge conflict in ns1/latest-changes.json",
        );
        assert!(matches!(err, GitError::Conflict(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_auth() {
        let err = classify_git_error("remote: Invalid username or password.\nfatal: Authentication failed for 'https://x/'");
        assert!(matches!(err, GitError::Auth(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_git_error("fatal: not a git repository\n");
        assert!(matches!(err, GitError::Operation(ref m) if m == "fatal: not a git repository"));
    }

    #[test]
    fn test_rejected_push() {
        let err = classify_git_error(
            " ! [rejected]        master -> master (fetch first)\nerror: failed to push some refs",
        );
        assert!(err.is_rejected_push());
        assert!(!GitError::Timeout(5).is_rejected_push());
    }
}
