//! Git persistence for the audit tree.

pub mod auth;
pub mod error;
pub mod parse;
pub mod repository;
pub mod store;
pub mod types;

pub use error::{classify_git_error, GitError};
pub use repository::GitRepository;
pub use store::GitStore;
pub use types::{CommitOutcome, GitStatus, PullOutcome};
