use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};

use super::error::{GitError, Result};
use super::repository::GitRepository;
use super::types::{CommitOutcome, GitStatus, PullOutcome};
use crate::config::GitSettings;
use crate::sanitize::redact_repo_url;

/// The durable store behind the audit tree.
///
/// Every operation holds one mutex for its whole duration, so at most one
/// git command touches the index or working tree at a time.
pub struct GitStore {
    root: PathBuf,
    repo: Mutex<GitRepository>,
}

impl GitStore {
    pub fn new(root: impl Into<PathBuf>, settings: GitSettings) -> Self {
        let root = root.into();
        Self {
            repo: Mutex::new(GitRepository::new(root.clone(), settings)),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Prepares the repository: clone into an empty directory, or initialize
    /// and align a new repository with the remote branch if it exists.
    pub fn bootstrap(&self) -> Result<()> {
        let repo = self.lock();
        std::fs::create_dir_all(&self.root)?;

        let settings = repo.settings().clone();
        let mut cloned = false;
        let mut fresh = false;

        if !repo.is_git_repo() {
            if settings.has_remote() && is_empty_dir(&self.root)? {
                log::info!(
                    "Cloning repository from {}",
                    redact_repo_url(&settings.remote_url)
                );
                match repo.clone_remote() {
                    Ok(()) => cloned = true,
                    Err(e) => log::warn!(
                        "Failed to clone repository, falling back to initialization: {}",
                        e
                    ),
                }
            }
            if !repo.is_git_repo() {
                log::info!("Initializing git repository at {}", self.root.display());
                repo.init()?;
                fresh = true;
            }
        } else {
            log::info!("Git repository already exists at {}", self.root.display());
        }

        repo.configure_identity()?;

        if !settings.has_remote() {
            log::info!("No git remote configured, commits stay local");
            return Ok(());
        }

        repo.set_remote(&settings.remote_url)?;

        if cloned {
            repo.checkout_branch()?;
            if repo.has_remote_branch() {
                repo.set_upstream()?;
            }
        } else if fresh {
            match repo.fetch() {
                Ok(true) => {
                    repo.reset_to_remote()?;
                    repo.set_upstream()?;
                    log::info!(
                        "Aligned local repository with origin/{} and set upstream",
                        settings.branch
                    );
                }
                Ok(false) => log::info!("Remote has no branch {} yet", settings.branch),
                Err(e) => log::warn!("Failed to align with remote: {}", e),
            }
        }

        Ok(())
    }

    /// Commits every working tree change. Creates no commit for a clean tree.
    pub fn commit(&self) -> Result<CommitOutcome> {
        let repo = self.lock();
        Self::commit_locked(&repo)
    }

    /// Pushes local commits. A no-op without a remote or without anything to push.
    pub fn push(&self) -> Result<()> {
        let repo = self.lock();
        Self::push_locked(&repo)
    }

    /// Brings the local branch up to date with the remote.
    pub fn pull_latest(&self) -> Result<PullOutcome> {
        let repo = self.lock();
        Self::pull_locked(&repo)
    }

    /// Commits, then pushes. Push failures are logged and left for the next push.
    pub fn commit_and_push(&self) -> Result<CommitOutcome> {
        let repo = self.lock();
        let outcome = Self::commit_locked(&repo)?;
        if let Err(e) = Self::push_locked(&repo) {
            log::warn!("Failed to push to remote, will retry on next push: {}", e);
        }
        Ok(outcome)
    }

    pub fn status(&self) -> Result<GitStatus> {
        self.lock().status()
    }

    fn commit_locked(repo: &GitRepository) -> Result<CommitOutcome> {
        let prefix = if repo.has_commits() {
            "Audit logger changes"
        } else {
            "Initial commit"
        };
        let message = format!(
            "{} - {}",
            prefix,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let outcome = repo.commit(&message)?;
        match &outcome {
            CommitOutcome::Committed(hash) => log::info!("Committed {}: {}", hash, message),
            CommitOutcome::NothingToCommit => log::debug!("No changes to commit"),
        }
        Ok(outcome)
    }

    fn push_locked(repo: &GitRepository) -> Result<()> {
        if !repo.settings().has_remote() || !repo.has_commits() {
            return Ok(());
        }

        let upstream = repo.has_upstream();
        if upstream && repo.status()?.ahead == 0 {
            log::debug!("No commits to push");
            return Ok(());
        }

        match repo.push(!upstream) {
            Ok(()) => {}
            Err(e) if e.is_rejected_push() => {
                log::warn!("Push rejected, rebasing onto origin/{} and retrying", repo.branch());
                Self::pull_locked(repo)?;
                repo.push(!repo.has_upstream())?;
            }
            Err(e) => return Err(e),
        }
        log::info!("Pushed changes to origin/{}", repo.branch());
        Ok(())
    }

    fn pull_locked(repo: &GitRepository) -> Result<PullOutcome> {
        if !repo.settings().has_remote() {
            return Ok(PullOutcome::NoRemote);
        }
        if !repo.is_git_repo() {
            return Err(GitError::NotInitialized);
        }
        if !repo.fetch()? {
            return Ok(PullOutcome::RemoteBranchMissing);
        }

        if !repo.has_commits() {
            let files_changed = repo.pull(false)?;
            log::info!("Pulled initial content from origin/{}", repo.branch());
            return Ok(PullOutcome::Updated { files_changed });
        }

        match repo.pull(true) {
            Ok(files_changed) => {
                if files_changed > 0 {
                    log::info!("Pulled {} changed files from remote", files_changed);
                }
                Ok(PullOutcome::Updated { files_changed })
            }
            Err(e) => {
                repo.rebase_abort();
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GitRepository> {
        self.repo.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn bare_remote(dir: &Path) -> PathBuf {
        let path = dir.join("remote.git");
        let status = Command::new("git")
            .args(["init", "--bare", "--quiet"])
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());
        path
    }

    fn settings(remote: &Path) -> GitSettings {
        GitSettings {
            remote_url: remote.display().to_string(),
            branch: "audit".to_string(),
            ..Default::default()
        }
    }

    fn remote_commit_count(remote: &Path) -> usize {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(remote)
            .args(["rev-list", "--count", "audit"])
            .output()
            .unwrap();
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().unwrap()
    }

    #[test]
    fn test_local_only_store() {
        let temp = TempDir::new().unwrap();
        let store = GitStore::new(temp.path().join("tree"), GitSettings::default());
        store.bootstrap().unwrap();

        std::fs::write(store.root().join("a.yaml"), "a: 1\n").unwrap();
        assert!(store.commit_and_push().unwrap().hash().is_some());
        assert_eq!(store.pull_latest().unwrap(), PullOutcome::NoRemote);
        assert_eq!(store.commit().unwrap(), CommitOutcome::NothingToCommit);
    }

    #[test]
    fn test_clone_empty_remote_and_push() {
        let temp = TempDir::new().unwrap();
        let remote = bare_remote(temp.path());
        let store = GitStore::new(temp.path().join("tree"), settings(&remote));
        store.bootstrap().unwrap();

        assert_eq!(store.pull_latest().unwrap(), PullOutcome::RemoteBranchMissing);

        std::fs::write(store.root().join("a.yaml"), "a: 1\n").unwrap();
        store.commit_and_push().unwrap();
        assert_eq!(remote_commit_count(&remote), 1);

        // Nothing new: no commit, nothing to push
        store.commit_and_push().unwrap();
        assert_eq!(remote_commit_count(&remote), 1);
    }

    #[test]
    fn test_failed_push_is_carried_by_next_push() {
        let temp = TempDir::new().unwrap();
        let remote = bare_remote(temp.path());
        let store = GitStore::new(temp.path().join("tree"), settings(&remote));
        store.bootstrap().unwrap();

        let hidden = temp.path().join("remote.hidden");
        std::fs::rename(&remote, &hidden).unwrap();
        std::fs::write(store.root().join("a.yaml"), "a: 1\n").unwrap();
        assert!(store.commit_and_push().unwrap().hash().is_some());
        assert!(store.push().is_err());

        std::fs::rename(&hidden, &remote).unwrap();
        std::fs::write(store.root().join("b.yaml"), "b: 1\n").unwrap();
        store.commit_and_push().unwrap();

        assert_eq!(remote_commit_count(&remote), 2);
    }

    #[test]
    fn test_fresh_repository_aligns_with_remote() {
        let temp = TempDir::new().unwrap();
        let remote = bare_remote(temp.path());

        let first = GitStore::new(temp.path().join("first"), settings(&remote));
        first.bootstrap().unwrap();
        std::fs::write(first.root().join("a.yaml"), "a: 1\n").unwrap();
        first.commit_and_push().unwrap();

        // A non-empty directory is initialized rather than cloned
        let second_root = temp.path().join("second");
        std::fs::create_dir_all(&second_root).unwrap();
        std::fs::write(second_root.join("scratch.txt"), "x").unwrap();
        let second = GitStore::new(&second_root, settings(&remote));
        second.bootstrap().unwrap();

        assert!(second_root.join("a.yaml").exists());
        assert_eq!(second.status().unwrap().ahead, 0);
    }

    #[test]
    fn test_diverged_push_rebases_and_retries() {
        let temp = TempDir::new().unwrap();
        let remote = bare_remote(temp.path());

        let first = GitStore::new(temp.path().join("first"), settings(&remote));
        first.bootstrap().unwrap();
        std::fs::write(first.root().join("a.yaml"), "a: 1\n").unwrap();
        first.commit_and_push().unwrap();

        let second = GitStore::new(temp.path().join("second"), settings(&remote));
        second.bootstrap().unwrap();
        assert!(second.root().join("a.yaml").exists());

        std::fs::write(first.root().join("b.yaml"), "b: 1\n").unwrap();
        first.commit_and_push().unwrap();

        std::fs::write(second.root().join("c.yaml"), "c: 1\n").unwrap();
        second.commit().unwrap();
        second.push().unwrap();

        assert_eq!(remote_commit_count(&remote), 3);
        assert!(second.root().join("b.yaml").exists());

        assert!(matches!(
            first.pull_latest().unwrap(),
            PullOutcome::Updated { .. }
        ));
        assert!(first.root().join("c.yaml").exists());
    }
}
