//! Thin wrapper over the `git` command line.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tokio::process::Command as TokioCommand;

use super::auth::{build_auth_env, AuthEnv};
use super::error::{classify_git_error, GitError, Result};
use super::parse::{count_changed_files, format_git_error, parse_status};
use super::types::{CommitOutcome, GitStatus};
use crate::config::GitSettings;

/// A git working tree plus the settings used to talk to its remote.
///
/// Methods are not synchronized; callers go through [`super::GitStore`].
pub struct GitRepository {
    repo_path: PathBuf,
    settings: GitSettings,
}

impl GitRepository {
    pub fn new(repo_path: impl Into<PathBuf>, settings: GitSettings) -> Self {
        Self {
            repo_path: repo_path.into(),
            settings,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    pub fn branch(&self) -> &str {
        &self.settings.branch
    }

    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    pub fn has_commits(&self) -> bool {
        self.run_git(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Initializes a repository with HEAD on the configured branch.
    pub fn init(&self) -> Result<()> {
        self.git(&["init", "--quiet"])?;
        let head = format!("refs/heads/{}", self.settings.branch);
        self.git(&["symbolic-ref", "HEAD", &head])?;
        Ok(())
    }

    pub fn configure_identity(&self) -> Result<()> {
        self.git(&["config", "user.name", &self.settings.user_name])?;
        self.git(&["config", "user.email", &self.settings.user_email])?;
        Ok(())
    }

    /// Points `origin` at `url`, adding the remote if needed.
    pub fn set_remote(&self, url: &str) -> Result<()> {
        let existing = self.run_git(&["remote", "get-url", "origin"])?;
        if existing.status.success() {
            if String::from_utf8_lossy(&existing.stdout).trim() != url {
                self.git(&["remote", "set-url", "origin", url])?;
            }
        } else {
            self.git(&["remote", "add", "origin", url])?;
        }
        Ok(())
    }

    /// Whether the last fetch saw the branch on `origin`.
    pub fn has_remote_branch(&self) -> bool {
        let reference = format!("refs/remotes/origin/{}", self.settings.branch);
        self.run_git(&["rev-parse", "--verify", "--quiet", &reference])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn has_upstream(&self) -> bool {
        self.run_git(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn set_upstream(&self) -> Result<()> {
        let upstream = format!("--set-upstream-to=origin/{}", self.settings.branch);
        self.git(&["branch", &upstream])?;
        Ok(())
    }

    /// Moves the local branch, index and working tree onto `origin/<branch>`.
    pub fn reset_to_remote(&self) -> Result<()> {
        let remote = format!("origin/{}", self.settings.branch);
        self.git(&["reset", "--hard", &remote])?;
        Ok(())
    }

    /// Checks out the configured branch, tracking the remote copy when one exists.
    pub fn checkout_branch(&self) -> Result<()> {
        let branch = self.settings.branch.as_str();
        if self.has_remote_branch() {
            let remote = format!("origin/{}", branch);
            self.git(&["checkout", "--quiet", "-B", branch, &remote])?;
        } else if self.has_commits() {
            self.git(&["checkout", "--quiet", "-B", branch])?;
        } else {
            let head = format!("refs/heads/{}", branch);
            self.git(&["symbolic-ref", "HEAD", &head])?;
        }
        Ok(())
    }

    pub fn status(&self) -> Result<GitStatus> {
        if !self.is_git_repo() {
            return Err(GitError::NotInitialized);
        }
        let stdout = self.git(&["status", "--porcelain", "-b", "--untracked-files=all"])?;
        Ok(parse_status(&stdout))
    }

    /// Stages everything, including deletions, and commits if anything is staged.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        if !self.is_git_repo() {
            return Err(GitError::NotInitialized);
        }

        self.git(&["add", "-A"])?;
        if self.status()?.is_clean() {
            return Ok(CommitOutcome::NothingToCommit);
        }

        self.git(&["commit", "--quiet", "--no-verify", "-m", message])?;
        let hash = self.git(&["rev-parse", "--short", "HEAD"])?;
        Ok(CommitOutcome::Committed(hash.trim().to_string()))
    }

    pub fn rebase_abort(&self) {
        if let Err(e) = self.git(&["rebase", "--abort"]) {
            log::debug!("rebase --abort: {}", e);
        }
    }

    /// Clones the remote into the (empty) repository directory.
    pub fn clone_remote(&self) -> Result<()> {
        self.network(&["clone", "--quiet", &self.settings.remote_url, "."])?;
        Ok(())
    }

    /// Fetches the branch from `origin`. Returns `false` if the remote does not have it.
    pub fn fetch(&self) -> Result<bool> {
        match self.network(&["fetch", "--quiet", "origin", &self.settings.branch]) {
            Ok(_) => Ok(true),
            Err(GitError::Operation(message))
                if message.to_lowercase().contains("couldn't find remote ref") =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Pulls the branch, rebasing local commits unless `rebase` is false.
    /// Returns the number of files the pull touched.
    pub fn pull(&self, rebase: bool) -> Result<u32> {
        let mode = if rebase { "--rebase" } else { "--no-rebase" };
        let mut args = vec!["pull", mode];
        if rebase {
            args.push("--autostash");
        }
        args.extend(["origin", self.settings.branch.as_str()]);

        let output = self.network(&args)?;
        Ok(count_changed_files(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn push(&self, set_upstream: bool) -> Result<()> {
        let mut args = vec!["push", "--quiet"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.extend(["origin", self.settings.branch.as_str()]);
        self.network(&args)?;
        Ok(())
    }

    /// Runs a local git command, returning stdout or a classified error.
    fn git(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(GitError::from)
    }

    /// Runs a command that talks to the remote, bounded by the configured timeout.
    ///
    /// Must not be called from inside a Tokio runtime.
    fn network(&self, args: &[&str]) -> Result<Output> {
        let auth = self.get_auth_env()?;
        let timeout = self.settings.timeout();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let result: Result<Output> = runtime.block_on(async {
            let mut cmd = TokioCommand::new("git");
            cmd.current_dir(&self.repo_path)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            for (key, value) in &auth.env_vars {
                cmd.env(key, value);
            }

            let child = cmd.spawn()?;
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => Ok(output?),
                Err(_) => Err(GitError::Timeout(timeout.as_secs())),
            }
        });

        drop(auth);

        let output = result?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }
        Ok(output)
    }

    fn get_auth_env(&self) -> Result<AuthEnv> {
        build_auth_env(&self.settings.auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo(dir: &Path) -> GitRepository {
        let settings = GitSettings {
            branch: "audit".to_string(),
            ..Default::default()
        };
        GitRepository::new(dir, settings)
    }

    #[test]
    fn test_init_uses_configured_branch() {
        let temp = TempDir::new().unwrap();
        let repo = repo(temp.path());
        assert!(!repo.is_git_repo());

        repo.init().unwrap();
        repo.configure_identity().unwrap();

        assert!(repo.is_git_repo());
        assert!(!repo.has_commits());
        assert_eq!(repo.status().unwrap().branch.as_deref(), Some("audit"));
    }

    #[test]
    fn test_status_not_repo() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(repo(temp.path()).status(), Err(GitError::NotInitialized)));
    }

    #[test]
    fn test_commit_only_when_changed() {
        let temp = TempDir::new().unwrap();
        let repo = repo(temp.path());
        repo.init().unwrap();
        repo.configure_identity().unwrap();

        assert_eq!(repo.commit("empty").unwrap(), CommitOutcome::NothingToCommit);

        std::fs::create_dir_all(temp.path().join("ns1")).unwrap();
        std::fs::write(temp.path().join("ns1/latest-changes.json"), "{}\n").unwrap();
        let outcome = repo.commit("first").unwrap();
        assert!(outcome.hash().is_some());
        assert!(repo.has_commits());

        assert_eq!(repo.commit("again").unwrap(), CommitOutcome::NothingToCommit);

        std::fs::remove_file(temp.path().join("ns1/latest-changes.json")).unwrap();
        assert!(repo.commit("delete").unwrap().hash().is_some());
        assert!(repo.status().unwrap().is_clean());
    }

    #[test]
    fn test_set_remote_replaces_url() {
        let temp = TempDir::new().unwrap();
        let repo = repo(temp.path());
        repo.init().unwrap();

        repo.set_remote("https://example.com/a.git").unwrap();
        repo.set_remote("https://example.com/b.git").unwrap();

        let url = repo.git(&["remote", "get-url", "origin"]).unwrap();
        assert_eq!(url.trim(), "https://example.com/b.git");
    }

    #[test]
    fn test_fetch_unreachable_remote_fails() {
        let temp = TempDir::new().unwrap();
        let repo = repo(temp.path());
        repo.init().unwrap();
        repo.set_remote(&temp.path().join("missing.git").display().to_string())
            .unwrap();

        assert!(repo.fetch().is_err());
    }
}
