//! Test harness for isolated test execution.
//!
//! Every harness owns a temporary directory holding the audit tree and,
//! optionally, a bare repository acting as the Git remote.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use kubetrail::cluster::{ClusterClient, InMemoryCluster};
use kubetrail::config::{AuditConfig, HelmSettings};
use kubetrail::helm::{NoProbe, RepositoryLocator};
use kubetrail::{AuditContext, AuditEvent, ChangeRecord, EventOutcome, EventProcessor, Reconciler};

pub const BRANCH: &str = "audit";

pub struct TestHarness {
    temp_dir: TempDir,
    /// Root of the audit tree.
    pub storage: PathBuf,
    /// Bare repository used as `origin`, if any.
    pub remote: Option<PathBuf>,
    pub cluster: Arc<InMemoryCluster>,
    pub context: Arc<AuditContext>,
    pub processor: EventProcessor,
}

impl TestHarness {
    /// Local-only tree, bootstrapped and past its initial sync.
    pub fn new() -> Self {
        Self::build(false, |_| {})
    }

    /// Same as [`new`](Self::new) with a bare remote.
    pub fn with_remote() -> Self {
        Self::build(true, |_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut AuditConfig)) -> Self {
        Self::build(false, configure)
    }

    fn build(remote: bool, configure: impl FnOnce(&mut AuditConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = temp_dir.path().join("audit");
        let remote = remote.then(|| init_bare(&temp_dir.path().join("remote.git")));

        let mut config = AuditConfig::new(&storage);
        config.git.branch = BRANCH.to_string();
        if let Some(remote) = &remote {
            config.git.remote_url = remote.display().to_string();
        }
        configure(&mut config);

        let cluster = Arc::new(InMemoryCluster::new());
        let context = Arc::new(open_context(config, Arc::clone(&cluster)));
        context.mark_sync_complete();
        let processor = EventProcessor::new(Arc::clone(&context));

        Self {
            temp_dir,
            storage,
            remote,
            cluster,
            context,
            processor,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A second instance on its own storage root, sharing the remote.
    pub fn second_instance(&self, dir_name: &str) -> Arc<AuditContext> {
        let mut config = AuditConfig::new(self.temp_path().join(dir_name));
        config.git = self.context.config.git.clone();
        Arc::new(open_context(config, Arc::clone(&self.cluster)))
    }

    pub fn process(&self, event: &AuditEvent) -> EventOutcome {
        self.processor.process(event).expect("Failed to process event")
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.context))
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.storage.join(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", relative, e))
    }

    pub fn read_yaml(&self, relative: &str) -> serde_json::Value {
        serde_yaml::from_str(&self.read(relative)).expect("Failed to parse YAML")
    }

    pub fn change(&self, namespace: &str) -> ChangeRecord {
        serde_json::from_str(&self.read(&format!("{}/latest-changes.json", namespace)))
            .expect("Failed to parse change record")
    }

    /// Files under `archived/` whose path contains `needle`.
    pub fn archived_files(&self, needle: &str) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.path("archived"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.to_string_lossy().contains(needle))
            .collect()
    }

    /// Runs git in the audit tree and returns stdout.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(Command::new("git").current_dir(&self.storage).args(args))
    }

    pub fn commit_count(&self) -> usize {
        let output = Command::new("git")
            .current_dir(&self.storage)
            .args(["rev-list", "--count", "HEAD"])
            .output()
            .expect("Failed to run git");
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.git(&["status", "--porcelain"]).trim().is_empty()
    }

    pub fn remote_commit_count(&self) -> usize {
        let Some(remote) = &self.remote else {
            return 0;
        };
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(remote)
            .args(["rev-list", "--count", BRANCH])
            .output()
            .expect("Failed to run git");
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(0)
    }

    /// Moves the remote out of reach until the returned path is passed to
    /// [`restore_remote`](Self::restore_remote).
    pub fn break_remote(&self) -> PathBuf {
        let remote = self.remote.as_ref().expect("Harness has no remote");
        let parked = remote.with_extension("parked");
        std::fs::rename(remote, &parked).expect("Failed to move remote");
        parked
    }

    pub fn restore_remote(&self, parked: &Path) {
        let remote = self.remote.as_ref().expect("Harness has no remote");
        std::fs::rename(parked, remote).expect("Failed to restore remote");
    }
}

fn open_context(config: AuditConfig, cluster: Arc<InMemoryCluster>) -> AuditContext {
    let context = AuditContext::new(
        config,
        cluster as Arc<dyn ClusterClient>,
        RepositoryLocator::new(HelmSettings::default(), Arc::new(NoProbe)),
    );
    context.bootstrap().expect("Failed to bootstrap audit tree");
    context
}

fn init_bare(path: &Path) -> PathBuf {
    run_git(Command::new("git").args(["init", "--bare", "--quiet"]).arg(path));
    path.to_path_buf()
}

fn run_git(command: &mut Command) -> String {
    let output = command.output().expect("Failed to run git");
    assert!(
        output.status.success(),
        "git failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}
