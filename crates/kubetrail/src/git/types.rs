//! Plain data returned by repository operations.

use serde::Serialize;

/// Individual file status in the working tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub path: String,
    /// 'M', 'A', 'D', 'R' or '?' for untracked.
    pub status: char,
    pub staged: bool,
}

/// Working tree status as reported by `git status --porcelain -b`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    pub branch: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<FileStatus>,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.files.is_empty()
    }
}

/// Outcome of committing the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created with the given short hash.
    Committed(String),
    NothingToCommit,
}

impl CommitOutcome {
    pub fn hash(&self) -> Option<&str> {
        match self {
            CommitOutcome::Committed(hash) => Some(hash),
            CommitOutcome::NothingToCommit => None,
        }
    }
}

/// Outcome of bringing the local branch up to date with the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// No remote is configured.
    NoRemote,
    /// The remote has no copy of the branch yet.
    RemoteBranchMissing,
    Updated { files_changed: u32 },
}
