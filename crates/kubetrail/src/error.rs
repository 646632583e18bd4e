use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::git::GitError;
use crate::helm::DecodeError;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Helm release decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Malformed admission event: {0}")]
    MalformedEvent(String),

    #[error("Audit pipeline is not ready")]
    NotReady,
}

/// What a caller does with an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log and move on; the work item is not retried.
    LogAndSkip,
    /// Log and move on; the next successful operation carries the backlog.
    RetryLater,
    /// Pause and retry the same work item after a fixed backoff.
    RetryWithBackoff,
    /// Surface to the caller (startup only).
    Propagate,
}

impl AuditError {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            AuditError::Config(_) => ErrorPolicy::Propagate,
            AuditError::Git(e) if e.is_retryable() => ErrorPolicy::RetryLater,
            AuditError::Git(_) => ErrorPolicy::LogAndSkip,
            AuditError::Cluster(_) => ErrorPolicy::LogAndSkip,
            AuditError::Decode(_) => ErrorPolicy::LogAndSkip,
            AuditError::Storage(_) => ErrorPolicy::LogAndSkip,
            AuditError::MalformedEvent(_) => ErrorPolicy::LogAndSkip,
            AuditError::NotReady => ErrorPolicy::RetryWithBackoff,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Partial move of '{from}' to '{to}': {failed} of {total} files failed")]
    PartialMove {
        from: PathBuf,
        to: PathBuf,
        failed: usize,
        total: usize,
    },

    #[error("Failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to serialize '{path}': {message}")]
    Serialize { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, AuditError>;
